use anyhow::{Result, bail, Context, anyhow};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use crate::http_11_headers::{self, parse_header};
use crate::http_request_context::{Http11RequestContext, Http11RequestContextBuilder};
use crate::http_type::HttpVersion;

pub const MAX_HEAD_SIZE: usize = 64 * 1024;
/// Request bodies above this are refused; the scenario routes never read them.
pub const MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024;

/// Reads a request or response head up to and including the blank line.
///
/// `Ok(None)` means the peer closed the stream before sending a single byte, which is
/// how an idle keep-alive connection ends. EOF anywhere later is an error.
pub async fn read_head<R>(reader: &mut R) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut acc = Vec::with_capacity(1024);
    loop {
        // One byte past the limit is enough to tell an oversized head apart.
        let budget = (MAX_HEAD_SIZE + 1 - acc.len()) as u64;
        // Ok(0) from read_until is a real EOF, not a slow peer.
        let read_size = (&mut *reader).take(budget).read_until(b'\n', &mut acc).await?;
        if read_size == 0 {
            if acc.is_empty() {
                return Ok(None);
            }
            bail!("EOF before header termination.")
        }

        // read_until(b'\n') ensure this.
        if acc.ends_with(b"\r\n\r\n") {
            break;
        }
        // Tolerate stray CRLFs ahead of the start line (RFC 9112 section 2.2).
        if acc == b"\r\n" {
            acc.clear();
            continue;
        }
        if acc.len() > MAX_HEAD_SIZE {
            bail!("message head exceeds {} bytes", MAX_HEAD_SIZE)
        }
    }
    Ok(Some(acc))
}

/// Splits a head into its start line and the raw header block.
pub fn split_head(head: Vec<u8>) -> Result<(String, String)> {
    let head = String::from_utf8(head).context("Invalid UTF-8 sequence")?;
    match head.split_once("\r\n") {
        Some((start, rest)) => Ok((start.to_string(), rest.to_string())),
        None => bail!("missing start line"),
    }
}

pub struct Http11Handler;

impl Http11Handler {
    pub fn new() -> Self {
        Http11Handler {}
    }

    async fn parse_body<R>(&mut self,
                           reader: &mut R,
                           content_length: Option<usize>) -> Result<Option<Vec<u8>>>
    where
        R: AsyncBufRead + Unpin,
    {
        match content_length {
            None | Some(0) => Ok(None),
            Some(content_length) if content_length > MAX_REQUEST_BODY_SIZE => {
                bail!("request body of {} bytes exceeds {} bytes", content_length, MAX_REQUEST_BODY_SIZE)
            }
            Some(content_length) => {
                let mut buf = vec![0u8; content_length];
                reader.read_exact(&mut buf).await?;
                Ok(Some(buf))
            }
        }
    }

    pub fn parse_request_line(&self, request_line: &str) -> Result<(String, String, String)> {
        let mut it = request_line.split_whitespace();
        let (method, path, version) = match (it.next(), it.next(), it.next()) {
            (Some(m), Some(p), Some(v)) => (m, p, v),
            _ => bail!("need at least 3 tokens")
        };

        Ok((method.to_string(), path.to_string(), version.to_string()))
    }

    /// Reads one request off a keep-alive connection. `Ok(None)` when the client hung up
    /// between requests.
    pub async fn handle<R>(&mut self, reader: &mut R) -> Result<Option<Http11RequestContext>>
    where
        R: AsyncBufRead + Unpin,
    {
        let head = match read_head(reader).await? {
            Some(head) => head,
            None => return Ok(None),
        };
        let (request_line, header_block) = split_head(head)?;

        let mut req_ctx_builder = Http11RequestContextBuilder::new();
        let (method, path, version) = self.parse_request_line(&request_line)?;
        req_ctx_builder
            .method(method.parse().map_err(|_| anyhow!("invalid HTTP method: {}", method))?)
            .path(path)
            .version(version.parse::<HttpVersion>().map_err(|_| anyhow!("unsupported version: {}", version))?);

        let headers = parse_header(&header_block);
        if http_11_headers::is_chunked(&headers) {
            // The scenario handlers never look at request bodies.
            bail!("chunked request bodies are not supported")
        }

        let maybe_body = self.parse_body(reader, http_11_headers::content_length(&headers)?)
            .await
            .context("Failed to parse body because it is invalid.")?;

        req_ctx_builder.headers(headers);

        if let Some(body) = maybe_body {
            req_ctx_builder.body(body);
        }

        Ok(Some(req_ctx_builder.build()?))
    }
}

impl Default for Http11Handler {
    fn default() -> Self {
        Self::new()
    }
}
