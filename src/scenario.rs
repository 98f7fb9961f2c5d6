//! Fixed server behaviours that push a client down each reuse / no-reuse branch.

use std::time::SystemTime;
use anyhow::Result;
use tracing::info;
use crate::http_11_headers::{CONNECTION, CONTENT_LENGTH};
use crate::http_object::{HttpRequest, HttpResponse};
use crate::http_type::Method;
use crate::server::ServerBuilder;

pub const NORMAL_PATH: &str = "/case1";
pub const CLIENT_CLOSE_PATH: &str = "/case2";
pub const SERVER_CLOSE_PATH: &str = "/case3";
pub const SEVER_PATH: &str = "/case4";
pub const ROOT_PATH: &str = "/";

pub const SEVER_DECLARED_LENGTH: usize = 1000;
pub const SEVER_PARTIAL_BODY: &str = "Starting response...";

pub fn register(builder: &mut ServerBuilder<'_>) -> Result<()> {
    builder
        .add(Method::GET, NORMAL_PATH, normal)?
        .add(Method::GET, CLIENT_CLOSE_PATH, client_close)?
        .add(Method::GET, SERVER_CLOSE_PATH, server_close)?
        .add(Method::GET, SEVER_PATH, sever_mid_response)?
        .add(Method::GET, ROOT_PATH, timestamp)?;
    Ok(())
}

/// Well-formed, length-declared body with no close directive.
pub fn normal(_req: HttpRequest, mut res: HttpResponse) -> Result<HttpResponse> {
    info!("Case 1: Sending response that client won't read");
    res.write("This response body won't be read by client\n");
    Ok(res)
}

/// Reports what the client asked for; closing is left to the connection loop.
pub fn client_close(req: HttpRequest, mut res: HttpResponse) -> Result<HttpResponse> {
    let requested = req.header(CONNECTION).unwrap_or("").to_string();
    info!("Case 2: Client requested connection close: {:?}", requested);
    res.set_header("X-Client-Connection", requested);
    res.write("Responding to client that requested connection close\n");
    Ok(res)
}

pub fn server_close(_req: HttpRequest, mut res: HttpResponse) -> Result<HttpResponse> {
    info!("Case 3: Server forcing connection close");
    res.set_header(CONNECTION, "close");
    res.write("Server is closing this connection\n");
    Ok(res)
}

/// Lies about the length, flushes a prefix of the body, then drops the stream.
pub fn sever_mid_response(_req: HttpRequest, mut res: HttpResponse) -> Result<HttpResponse> {
    info!("Case 4: Server will close connection mid-response");
    res.set_header(CONTENT_LENGTH, SEVER_DECLARED_LENGTH.to_string());
    res.write(SEVER_PARTIAL_BODY);
    res.sever_after_flush();
    Ok(res)
}

pub fn timestamp(_req: HttpRequest, mut res: HttpResponse) -> Result<HttpResponse> {
    res.write(format!("Response at {}\n", humantime::format_rfc3339_seconds(SystemTime::now())));
    Ok(res)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_request_context::Http11RequestContextBuilder;
    use crate::http_11_headers::parse_header;
    use crate::http_type::HttpVersion;

    fn get(path: &str, raw_headers: &str) -> HttpRequest {
        let mut builder = Http11RequestContextBuilder::new();
        builder
            .method(Method::GET)
            .path(path)
            .version(HttpVersion::HTTP11)
            .headers(parse_header(raw_headers));
        builder.build().unwrap().into()
    }

    #[test]
    fn client_close_does_not_force_close_itself() {
        let res = client_close(get(CLIENT_CLOSE_PATH, "Connection: close\r\n"), HttpResponse::new()).unwrap();
        assert!(!res.wants_close());
        assert_eq!(res.header("x-client-connection"), Some("close"));
    }

    #[test]
    fn server_close_sets_the_directive() {
        let res = server_close(get(SERVER_CLOSE_PATH, ""), HttpResponse::new()).unwrap();
        assert!(res.wants_close());
    }

    #[test]
    fn sever_declares_more_than_it_sends() {
        let res = sever_mid_response(get(SEVER_PATH, ""), HttpResponse::new()).unwrap();
        assert!(res.should_sever());
        assert!(res.body().len() < SEVER_DECLARED_LENGTH);
        assert_eq!(res.header(CONTENT_LENGTH), Some("1000"));
    }

    #[test]
    fn timestamp_is_rfc3339() {
        let res = timestamp(get(ROOT_PATH, ""), HttpResponse::new()).unwrap();
        let body = String::from_utf8(res.body().to_vec()).unwrap();
        assert!(body.starts_with("Response at "));
        assert!(body.trim_end().ends_with('Z'));
    }
}
