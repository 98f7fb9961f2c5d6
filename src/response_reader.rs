use std::io;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use crate::connection_reader::{read_head, split_head};
use crate::errors::ExecuteError;
use crate::http_11_headers::{self, parse_header, Headers};
use crate::http_status::status_forbids_body;
use crate::http_type::{HttpVersion, Method};

const READ_CHUNK: usize = 8 * 1024;
/// Chunk-size and trailer lines.
const MAX_CHUNK_LINE: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub version: HttpVersion,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

impl ResponseHead {
    pub fn wants_close(&self) -> bool {
        http_11_headers::wants_close(self.version, &self.headers)
    }
}

/// How the end of a response body is found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(usize),
    Chunked,
    /// HTTP/1.0 style: the body ends when the server closes. Never reusable.
    UntilClose,
}

pub async fn read_response_head<R>(reader: &mut R) -> Result<ResponseHead, ExecuteError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let head = match read_head(reader).await {
            Ok(Some(head)) => head,
            Ok(None) => {
                return Err(ExecuteError::Read(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "server closed the connection before responding",
                )))
            }
            Err(e) => {
                return Err(match e.downcast::<io::Error>() {
                    Ok(io) => ExecuteError::Read(io),
                    Err(other) => ExecuteError::MalformedResponse(other.to_string()),
                })
            }
        };

        let (status_line, header_block) =
            split_head(head).map_err(|e| ExecuteError::MalformedResponse(e.to_string()))?;
        let (version, status, reason) = parse_status_line(&status_line)?;

        // Interim 1xx responses precede the real one on the same connection.
        if (100..200).contains(&status) && status != 101 {
            continue;
        }

        return Ok(ResponseHead { version, status, reason, headers: parse_header(&header_block) });
    }
}

fn parse_status_line(line: &str) -> Result<(HttpVersion, u16, String), ExecuteError> {
    let malformed = || ExecuteError::MalformedResponse(format!("bad status line: {:?}", line));

    let mut it = line.splitn(3, ' ');
    let version = it.next().and_then(|v| v.parse::<HttpVersion>().ok()).ok_or_else(malformed)?;
    let status = it.next().and_then(|s| s.parse::<u16>().ok()).ok_or_else(malformed)?;
    let reason = it.next().unwrap_or("").trim().to_string();
    Ok((version, status, reason))
}

pub fn body_framing(method: Method, head: &ResponseHead) -> Result<BodyFraming, ExecuteError> {
    if method == Method::HEAD || status_forbids_body(head.status) {
        return Ok(BodyFraming::Empty);
    }
    // Transfer-Encoding overrides Content-Length (RFC 9112 section 6.3).
    if http_11_headers::is_chunked(&head.headers) {
        return Ok(BodyFraming::Chunked);
    }
    match http_11_headers::content_length(&head.headers)
        .map_err(|e| ExecuteError::MalformedResponse(e.to_string()))?
    {
        Some(0) => Ok(BodyFraming::Empty),
        Some(n) => Ok(BodyFraming::Length(n)),
        None => Ok(BodyFraming::UntilClose),
    }
}

pub async fn read_body<R>(reader: &mut R, framing: BodyFraming) -> Result<Bytes, ExecuteError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = BytesMut::new();
    match framing {
        BodyFraming::Empty => {}
        BodyFraming::Length(declared) => {
            read_exactly(reader, declared, &mut body, 0).await?;
        }
        BodyFraming::Chunked => read_chunked(reader, &mut body).await?,
        BodyFraming::UntilClose => {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await.map_err(ExecuteError::Read)?;
            body.extend_from_slice(&buf);
        }
    }
    Ok(body.freeze())
}

/// Appends exactly `n` bytes to `out`. Running out of stream first is a severance;
/// `already` counts body bytes received before this call, for the error report.
///
/// `n` is whatever the peer declared, so the buffer only grows as bytes arrive.
async fn read_exactly<R>(reader: &mut R, n: usize, out: &mut BytesMut, already: usize) -> Result<(), ExecuteError>
where
    R: AsyncBufRead + Unpin,
{
    let declared = already
        .checked_add(n)
        .ok_or_else(|| ExecuteError::MalformedResponse(format!("body length overflows after {} bytes", already)))?;
    let severed = |remaining: usize| ExecuteError::PrematureSeverance { declared, received: declared - remaining };

    let mut limited = (&mut *reader).take(n as u64);
    let mut remaining = n;
    while remaining > 0 {
        out.reserve(remaining.min(READ_CHUNK));
        match limited.read_buf(out).await {
            Ok(0) => return Err(severed(remaining)),
            Ok(read) => remaining -= read,
            Err(e) if is_severance(&e) => return Err(severed(remaining)),
            Err(e) => return Err(ExecuteError::Read(e)),
        }
    }
    Ok(())
}

async fn read_chunked<R>(reader: &mut R, out: &mut BytesMut) -> Result<(), ExecuteError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let line = read_line(reader, out.len()).await?;
        let size_text = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_text, 16)
            .map_err(|_| ExecuteError::MalformedResponse(format!("bad chunk size: {:?}", size_text)))?;

        if size == 0 {
            // Trailers until the terminating blank line.
            while !read_line(reader, out.len()).await?.is_empty() {}
            return Ok(());
        }

        let already = out.len();
        read_exactly(reader, size, out, already).await?;
        if !read_line(reader, out.len()).await?.is_empty() {
            return Err(ExecuteError::MalformedResponse("chunk not terminated by CRLF".to_string()));
        }
    }
}

async fn read_line<R>(reader: &mut R, received: usize) -> Result<String, ExecuteError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(MAX_CHUNK_LINE as u64)
        .read_until(b'\n', &mut line)
        .await
        .map_err(ExecuteError::Read)?;
    if line.len() >= MAX_CHUNK_LINE && !line.ends_with(b"\n") {
        return Err(ExecuteError::MalformedResponse(format!("chunk line exceeds {} bytes", MAX_CHUNK_LINE)));
    }
    if read == 0 || !line.ends_with(b"\n") {
        return Err(ExecuteError::PrematureSeverance { declared: received + 1, received });
    }
    let text = String::from_utf8(line).map_err(|_| ExecuteError::MalformedResponse("non UTF-8 chunk line".to_string()))?;
    Ok(text.trim_end_matches(['\r', '\n']).to_string())
}

fn is_severance(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted
    )
}
