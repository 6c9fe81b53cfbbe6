//! Percent-decoding of request paths and `application/x-www-form-urlencoded` pairs.

use std::collections::HashMap;

use percent_encoding::percent_decode_str;

/// Percent-decodes a request path.
///
/// `+` is kept as is: it only means a space inside query strings and form content.
/// Sequences that do not decode to valid UTF-8 are replaced rather than rejected.
pub fn decode_path(path: &str) -> String {
    percent_decode_str(path).decode_utf8_lossy().into_owned()
}

/// Decodes `name=value` pairs separated by `&`.
///
/// A name without `=` gets an empty value, and a repeated name keeps its last value.
pub fn parse_pairs(input: &str) -> Result<HashMap<String, String>, serde_urlencoded::de::Error> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_str(input)?;
    Ok(pairs.into_iter().collect())
}
