use std::collections::HashMap;
use anyhow::{anyhow, Result};
use crate::http_type::HttpVersion;

// https://datatracker.ietf.org/doc/html/rfc2616#section-13.5.1
// - Connection
// - Keep-Alive
// - Proxy-Authenticate
// - Proxy-Authorization
// - TE
// - Trailers
// - Transfer-Encoding
// - Upgrade
//
// 19.6.2 Compatibility with HTTP/1.0 Persistent Connections
//
// Persistent connections are the default for HTTP/1.1 messages; we introduce
// a new keyword (Connection: close) for declaring non-persistence.
// See section 14.10.

pub const CONNECTION: &str = "connection";
pub const CONTENT_LENGTH: &str = "content-length";
pub const TRANSFER_ENCODING: &str = "transfer-encoding";
pub const HOST: &str = "host";

pub const CLOSE: &str = "close";
pub const KEEP_ALIVE: &str = "keep-alive";

/// Header names are lower-cased on parse so lookups never depend on the peer's casing.
pub type Headers = HashMap<String, String>;

pub fn parse_header(header_string: &str) -> Headers {
    let mut headers = HashMap::new();

    for line in header_string.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        // The space after the colon is optional.
        let mut kv = line.splitn(2, ':');
        match (kv.next(), kv.next()) {
            (Some(key), Some(value)) =>
                headers.insert(key.trim().to_ascii_lowercase(),
                               value.trim().to_string()),
            _ => continue
        };
    }

    headers
}

/// `Connection` carries a comma separated token list, e.g. `keep-alive, Upgrade`.
pub fn has_connection_token(headers: &Headers, token: &str) -> bool {
    headers
        .get(CONNECTION)
        .map(|value| value.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
        .unwrap_or(false)
}

/// The close directive as seen by either peer: an explicit `Connection: close`,
/// or an HTTP/1.0 message that did not opt into keep-alive.
pub fn wants_close(version: HttpVersion, headers: &Headers) -> bool {
    if has_connection_token(headers, CLOSE) {
        return true;
    }
    !version.persistent_by_default() && !has_connection_token(headers, KEEP_ALIVE)
}

pub fn content_length(headers: &Headers) -> Result<Option<usize>> {
    match headers.get(CONTENT_LENGTH) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| anyhow!("invalid content-length: {}", value)),
    }
}

pub fn is_chunked(headers: &Headers) -> bool {
    headers
        .get(TRANSFER_ENCODING)
        .and_then(|value| value.split(',').last())
        .map(|last| last.trim().eq_ignore_ascii_case("chunked"))
        .unwrap_or(false)
}
