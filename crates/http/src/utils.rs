//! Macros shared by the socket, codec and protocol layers.

/// Returns `Err` from the enclosing function unless `$predicate` holds.
///
/// The error goes through `Into`, so a layer can name its own error type while the
/// function returns a wider one.
///
/// ```ignore
/// ensure!(size > 0, SocketError::invalid_size(size));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr $(,)?) => {
        if !($predicate) {
            return Err(::core::convert::Into::into($error));
        }
    };
}

pub(crate) use ensure;
