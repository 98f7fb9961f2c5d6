#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpStatus {
    // 2XX
    OK,

    // 4XX
    BadRequest,
    NotFound,

    // 5XX
    InternalServerError,
}

impl HttpStatus {
    pub fn reason(&self) -> &'static str {
        match self {
            HttpStatus::OK => "OK",
            HttpStatus::BadRequest => "Bad Request",
            HttpStatus::NotFound => "Not Found",
            HttpStatus::InternalServerError => "Internal Server Error",
        }
    }
}

impl From<HttpStatus> for u16 {
    fn from(value: HttpStatus) -> Self {
        match value {
            HttpStatus::OK => 200u16,
            HttpStatus::BadRequest => 400u16,
            HttpStatus::NotFound => 404u16,
            HttpStatus::InternalServerError => 500u16,
        }
    }
}

impl From<HttpStatus> for String {
    fn from(value: HttpStatus) -> Self {
        value.reason().to_string()
    }
}

/// Whether a response with this status code never carries a body (RFC 9112 section 6.3).
pub fn status_forbids_body(code: u16) -> bool {
    (100..200).contains(&code) || code == 204 || code == 304
}
