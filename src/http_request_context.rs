use anyhow::anyhow;
use bytes::Bytes;
use crate::http_11_headers::Headers;
use crate::http_type::{HttpVersion, Method};

#[derive(Clone, Debug)]
pub struct Http11RequestContext {
    method: Method,
    path: String,
    version: HttpVersion,
    headers: Headers,
    body: Option<Bytes>
}

impl Http11RequestContext {

    pub fn new(method: Method,
               path: String,
               version: HttpVersion,
               headers: Headers,
               body: Option<Bytes>) -> Self {
        Self { method, path, version, headers, body }
    }

    pub fn should_close(&self) -> bool {
        crate::http_11_headers::wants_close(self.version, &self.headers)
    }

    pub fn into_part(self) -> (Method, String, HttpVersion, Headers, Option<Bytes>) {
        (self.method, self.path, self.version, self.headers, self.body)
    }
}

// Every field must be initialized at once, so values that only become known while
// parsing are collected here first.
pub struct Http11RequestContextBuilder {
    method: Option<Method>,
    path: Option<String>,
    version: Option<HttpVersion>,
    headers: Option<Headers>,
    body: Option<Vec<u8>>
}


impl Http11RequestContextBuilder {
    pub fn new() -> Self {
        Http11RequestContextBuilder {
            method: None,
            path: None,
            version: None,
            headers: None,
            body: None }
    }

    pub fn build(self) -> anyhow::Result<Http11RequestContext> {
        let method = self.method.ok_or_else(|| anyhow!("missing method."))?;
        let path = self.path.ok_or_else(|| anyhow!("missing path."))?;
        let version = self.version.ok_or_else(|| anyhow!("missing version."))?;
        let headers = self.headers.ok_or_else(|| anyhow!("missing headers."))?;

        let body = self.body.map(Bytes::from);

        Ok(Http11RequestContext::new(method, path, version, headers, body))
    }

    pub fn method(&mut self, method: Method) -> &mut Self {
        self.method.replace(method);
        self
    }

    pub fn path(&mut self, path: impl Into<String>) -> &mut Self {
        self.path = Some(path.into());
        self
    }

    pub fn version(&mut self, version: HttpVersion) -> &mut Self {
        self.version = Some(version);
        self
    }

    pub fn headers(&mut self, headers: Headers) -> &mut Self {
        self.headers = Some(headers);
        self
    }

    pub fn body(&mut self, body: impl Into<Vec<u8>>) -> &mut Self {
        self.body = Some(body.into());
        self
    }

}

impl Default for Http11RequestContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
