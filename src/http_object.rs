use std::fmt::Write;
use bytes::{BufMut, Bytes, BytesMut};
use crate::http_11_headers::{self, Headers};
use crate::http_request_context::Http11RequestContext;
use crate::http_status::HttpStatus;
use crate::http_type::{HttpVersion, Method};

pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    pub version: HttpVersion,
    pub headers: Headers,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    fn new(method: Method, path: String, version: HttpVersion, headers: Headers, body: Option<Bytes>) -> Self {
        HttpRequest { method, path, version, headers, body }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}


impl From<Http11RequestContext> for HttpRequest {
    fn from(ctx: Http11RequestContext) -> Self {
        let (method, path, version, headers, body) = ctx.into_part();
        HttpRequest::new(method, path, version, headers, body)
    }
}


pub struct HttpResponse {
    status_code: HttpStatus,
    headers: Headers,
    body: Bytes,
    sever: bool,
}

impl Default for HttpResponse {
    fn default() -> Self {
        HttpResponse{status_code: HttpStatus::OK, headers: Headers::new(), body: Bytes::new(), sever: false}
    }
}

impl HttpResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status_code(status_code: HttpStatus) -> Self {
        HttpResponse{status_code, ..Self::default()}
    }

    pub fn set_status_code(&mut self, status_code: HttpStatus) {
        self.status_code = status_code;
    }

    pub fn get_status_code(&self) -> HttpStatus {
        self.status_code
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn write(&mut self, body: impl AsRef<[u8]>) {
        let mut buf = BytesMut::from(&self.body[..]);
        buf.put_slice(body.as_ref());
        self.body = buf.freeze();
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Flush whatever was written, then shut the stream down instead of finishing the
    /// exchange. Paired with an inflated `Content-Length` this cuts the peer off mid-body.
    pub fn sever_after_flush(&mut self) {
        self.sever = true;
    }

    pub fn should_sever(&self) -> bool {
        self.sever
    }

    pub fn wants_close(&self) -> bool {
        http_11_headers::has_connection_token(&self.headers, http_11_headers::CLOSE)
    }

    // HTTP/1.1 200 OK
    // Content-Type: text/plain; charset=utf-8
    // Content-Length: 14
    // Connection: close
    //
    // Hello, World!
    pub fn encode(&self, close: bool) -> Bytes {
        let status_code: u16 = self.status_code.into();
        let mut head = String::with_capacity(128);
        let _ = write!(head, "HTTP/1.1 {} {}\r\n", status_code, self.status_code.reason());

        for (name, value) in &self.headers {
            let _ = write!(head, "{}: {}\r\n", name, value);
        }
        // A handler-provided length wins, even when it lies about the body.
        if !self.headers.contains_key(http_11_headers::CONTENT_LENGTH) {
            let _ = write!(head, "content-length: {}\r\n", self.body.len());
        }
        if close && !self.wants_close() {
            head.push_str("connection: close\r\n");
        }
        head.push_str("\r\n");

        let mut buf = BytesMut::with_capacity(head.len() + self.body.len());
        buf.put_slice(head.as_bytes());
        buf.put_slice(&self.body);
        buf.freeze()
    }
}
