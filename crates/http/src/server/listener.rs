use std::io;
use std::net::SocketAddr;

use mio::net::TcpListener;
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::MAX_BACKLOG;

/// Opens a non-blocking listener with `SO_REUSEADDR`, the backlog clipped to [`MAX_BACKLOG`].
pub(crate) fn bind(address: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&address.into())?;

    let backlog = i32::try_from(backlog.clamp(1, MAX_BACKLOG)).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    socket.listen(backlog)?;

    let listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(listener))
}
