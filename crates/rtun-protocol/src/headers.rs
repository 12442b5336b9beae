//! Hop-by-hop header filtering shared by both directions of a tunneled
//! exchange (§4.5). Kept here rather than duplicated in the edge and the
//! agent, since both sides need the exact same lists.

/// Stripped before an edge → agent `http_request` frame is built, and again
/// before the agent forwards the request to the local app.
pub const REQUEST_HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
];

/// Stripped from the local app's response before it is framed as
/// `http_response`, and again from the frame's headers before the edge
/// re-emits them to the public caller (the edge recomputes them).
pub const RESPONSE_HOP_BY_HOP: &[&str] = &["transfer-encoding", "content-length", "content-encoding"];

pub fn retain_request_headers(headers: impl IntoIterator<Item = (String, String)>) -> Vec<(String, String)> {
    headers
        .into_iter()
        .filter(|(name, _)| !REQUEST_HOP_BY_HOP.contains(&name.to_lowercase().as_str()))
        .collect()
}

pub fn retain_response_headers(headers: impl IntoIterator<Item = (String, String)>) -> Vec<(String, String)> {
    headers
        .into_iter()
        .filter(|(name, _)| !RESPONSE_HOP_BY_HOP.contains(&name.to_lowercase().as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_request_hop_by_hop_case_insensitively() {
        let headers = vec![
            ("Host".to_string(), "demo.ex.com".to_string()),
            ("Connection".to_string(), "keep-alive".to_string()),
            ("X-Custom".to_string(), "yes".to_string()),
        ];
        let kept = retain_request_headers(headers);
        assert_eq!(kept, vec![("X-Custom".to_string(), "yes".to_string())]);
    }

    #[test]
    fn strips_response_hop_by_hop() {
        let headers = vec![
            ("Content-Length".to_string(), "12".to_string()),
            ("Content-Type".to_string(), "text/plain".to_string()),
        ];
        let kept = retain_response_headers(headers);
        assert_eq!(kept, vec![("Content-Type".to_string(), "text/plain".to_string())]);
    }
}
