//! Placeholder bodies for responses that carry only a status.

use http::StatusCode;
use mime::Mime;

/// Picks a placeholder body for `status` from the media ranges a client accepts.
///
/// The first range naming HTML (or `*/*`) or JSON wins. Returns the media type and the
/// body, or `None` when no acceptable representation exists.
pub fn status_content<'a, I>(status: StatusCode, accept: I) -> Option<(Mime, String)>
where
    I: IntoIterator<Item = &'a str>,
{
    let code = status.as_u16();
    let reason = status.canonical_reason().unwrap_or("Unknown");

    accept.into_iter().find_map(|range| {
        let range: Mime = range.trim().parse().ok()?;
        let essence = range.essence_str();
        if essence == mime::TEXT_HTML.essence_str() || essence == mime::STAR_STAR.essence_str() {
            Some((mime::TEXT_HTML, html_page(code, reason)))
        } else if essence == mime::APPLICATION_JSON.essence_str() {
            Some((mime::APPLICATION_JSON, serde_json::json!({ "code": code, "name": reason }).to_string()))
        } else {
            None
        }
    })
}

fn html_page(code: u16, reason: &str) -> String {
    format!(
        "<html>\n\
         <head><title>{code} {reason}</title></head>\n\
         <body><h1>{code}</h1><p>{reason}</p></body>\n\
         </html>\n"
    )
}
