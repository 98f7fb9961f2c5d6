use std::fmt::Write;
use bytes::{BufMut, Bytes, BytesMut};
use crate::destination::DestinationKey;
use crate::http_type::Method;

/// What to send and how to treat the connection afterwards. Built once, then only read.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    method: Method,
    path: String,
    body: Option<Bytes>,
    request_close: bool,
    skip_body: bool,
}

impl RequestConfig {

    pub fn new(method: Method, path: impl Into<String>) -> Self {
        RequestConfig {
            method,
            path: path.into(),
            body: None,
            request_close: false,
            skip_body: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Send `Connection: close`. The connection is never pooled afterwards, whatever
    /// the server answers.
    pub fn with_close(mut self, request_close: bool) -> Self {
        self.request_close = request_close;
        self
    }

    /// Leave the response body unread. The connection is closed rather than pooled.
    pub fn with_skip_body(mut self, skip_body: bool) -> Self {
        self.skip_body = skip_body;
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn request_close(&self) -> bool {
        self.request_close
    }

    pub fn skip_body(&self) -> bool {
        self.skip_body
    }

    pub fn request_line(&self) -> String {
        format!("{} {} HTTP/1.1", self.method, self.path)
    }

    pub fn encode(&self, destination: &DestinationKey, close: bool, user_agent: &str) -> Bytes {
        let mut head = String::with_capacity(128);
        let _ = write!(head, "{}\r\n", self.request_line());
        let _ = write!(head, "Host: {}\r\n", destination.host_header());
        let _ = write!(head, "User-Agent: {}\r\n", user_agent);
        if close {
            head.push_str("Connection: close\r\n");
        }
        match (&self.body, self.method) {
            (Some(body), _) => {
                let _ = write!(head, "Content-Length: {}\r\n", body.len());
            }
            (None, Method::POST | Method::PUT) => head.push_str("Content-Length: 0\r\n"),
            (None, _) => {}
        }
        head.push_str("\r\n");

        let body_len = self.body.as_ref().map(Bytes::len).unwrap_or(0);
        let mut buf = BytesMut::with_capacity(head.len() + body_len);
        buf.put_slice(head.as_bytes());
        if let Some(body) = &self.body {
            buf.put_slice(body);
        }
        buf.freeze()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn text(bytes: Bytes) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn get_with_close() {
        let destination = DestinationKey::new("localhost", 8080);
        let wire = text(RequestConfig::get("/case2").with_close(true).encode(&destination, true, "test"));
        assert_eq!(
            wire,
            "GET /case2 HTTP/1.1\r\nHost: localhost:8080\r\nUser-Agent: test\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn body_declares_its_length() {
        let destination = DestinationKey::new("example.com", 80);
        let request = RequestConfig::new(Method::POST, "/echo").with_body("abc");
        let wire = text(request.encode(&destination, false, "test"));
        assert!(wire.contains("Host: example.com\r\n"));
        assert!(wire.ends_with("Content-Length: 3\r\n\r\nabc"));
        assert!(!wire.contains("Connection"));
    }

    #[test]
    fn flags_default_off() {
        let request = RequestConfig::get("/");
        assert!(!request.request_close());
        assert!(!request.skip_body());
        assert!(request.with_skip_body(true).skip_body());
    }
}
