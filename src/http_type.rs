use std::fmt;
use std::str::FromStr;


#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HttpVersion {
    HTTP10,
    HTTP11,
}

impl HttpVersion {
    // HTTP/1.1 connections are persistent unless told otherwise. HTTP/1.0 ones are not.
    pub fn persistent_by_default(&self) -> bool {
        matches!(self, HttpVersion::HTTP11)
    }
}

impl FromStr for HttpVersion {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "HTTP/1.1" => Ok(HttpVersion::HTTP11),
            "HTTP/1.0" | "HTTP/1" => Ok(HttpVersion::HTTP10),
            _ => Err(()),
        }
    }
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpVersion::HTTP10 => f.write_str("HTTP/1.0"),
            HttpVersion::HTTP11 => f.write_str("HTTP/1.1"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Method {
    GET,
    HEAD,
    POST,
    PUT,
    DELETE,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::HEAD => "HEAD",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
        }
    }
}

impl FromStr for Method {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET"    => Ok(Method::GET),
            "HEAD"   => Ok(Method::HEAD),
            "POST"   => Ok(Method::POST),
            "DELETE" => Ok(Method::DELETE),
            "PUT"    => Ok(Method::PUT),
            _        => Err(()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
