//! The reuse decision engine: one request/response exchange per `execute` call, with
//! the connection taken from and handed back to a shared [`ConnectionPool`].
//!
//! A connection goes back to the pool only when all of these hold:
//! - the client did not send `Connection: close`
//! - the server did not answer with a close directive
//! - the response body was read to its end
//! - no transport error, cancellation or timeout interrupted the exchange

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::select;
use tokio::time::{timeout, Instant as Deadline};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use crate::destination::DestinationKey;
use crate::errors::{ExecuteError, NotPooled};
use crate::http_11_headers::Headers;
use crate::http_type::HttpVersion;
use crate::pool::ConnectionPool;
use crate::pooled_connection::Connection;
use crate::request_config::RequestConfig;
use crate::response_reader::{body_framing, read_body, read_response_head, BodyFraming};
use crate::trace::{emit, TraceEvent, TraceSink};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_USER_AGENT: &str = concat!("http-conn-reuse/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub connect_timeout: Option<Duration>,
    /// Deadline for the whole exchange, connection setup included.
    pub request_timeout: Option<Duration>,
    /// Send `Connection: close` on every request, so nothing is ever pooled.
    pub disable_keep_alives: bool,
    pub user_agent: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        ExecutorConfig {
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            request_timeout: None,
            disable_keep_alives: false,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Timings {
    pub time_to_first_byte: Duration,
    pub total: Duration,
}

impl Timings {
    /// Time spent after the first response byte. A rough diagnostic only: it mixes
    /// server work with body transfer time.
    pub fn approximate_server_time(&self) -> Duration {
        self.total.saturating_sub(self.time_to_first_byte)
    }
}

#[derive(Debug, Clone)]
pub struct ResponseMetadata {
    pub version: HttpVersion,
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
    /// `None` when the request asked to skip the body.
    pub body: Option<Bytes>,
    pub connection_id: u64,
    pub reused: bool,
    pub idle_duration: Option<Duration>,
    /// Why the connection was closed instead of pooled, if it was.
    pub not_pooled: Option<NotPooled>,
    pub timings: Timings,
}

impl ResponseMetadata {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn returned_to_pool(&self) -> bool {
        self.not_pooled.is_none()
    }

    pub fn summary(&self) -> String {
        format!(
            "Total time: {:?}, reused: {}, server processing time (approximate): {:?}",
            self.timings.total,
            self.reused,
            self.timings.approximate_server_time()
        )
    }
}

struct Obtained {
    conn: Connection,
    reused: bool,
    idle_duration: Option<Duration>,
}

struct Exchange {
    version: HttpVersion,
    status: u16,
    reason: String,
    headers: Headers,
    body: Option<Bytes>,
    time_to_first_byte: Duration,
    verdict: Result<(), NotPooled>,
}

pub struct RequestExecutor {
    pool: Arc<ConnectionPool>,
    config: ExecutorConfig,
}

impl RequestExecutor {

    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self::with_config(pool, ExecutorConfig::default())
    }

    pub fn with_config(pool: Arc<ConnectionPool>, config: ExecutorConfig) -> Self {
        RequestExecutor { pool, config }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs one exchange against `destination`.
    ///
    /// Errors are never retried here. Whatever the outcome, the connection is either
    /// parked or closed before this returns, and the sink sees a
    /// `ConnectionReturnedToPool` event for every connection that was obtained.
    pub async fn execute(&self,
                         destination: &DestinationKey,
                         request: &RequestConfig,
                         sink: &dyn TraceSink,
                         cancel: &CancellationToken) -> Result<ResponseMetadata, ExecuteError> {
        let started = Instant::now();
        let deadline = self.config.request_timeout.map(|t| Deadline::now() + t);

        emit(sink, TraceEvent::GetConn { destination: destination.clone() });

        let Obtained { mut conn, reused, idle_duration } =
            self.obtain(destination, sink, cancel, deadline).await?;

        emit(sink, TraceEvent::ConnectionObtained {
            connection_id: conn.id(),
            reused,
            was_idle: idle_duration.is_some(),
            idle_duration: idle_duration.unwrap_or(Duration::ZERO),
        });

        let outcome = interruptible(self.exchange(&mut conn, destination, request, sink, started), cancel, deadline)
            .await
            .and_then(|exchange| exchange);

        let connection_id = conn.id();
        match outcome {
            Ok(exchange) => {
                let returned = self.finish(conn, exchange.verdict, sink);
                let metadata = ResponseMetadata {
                    version: exchange.version,
                    status: exchange.status,
                    reason: exchange.reason,
                    headers: exchange.headers,
                    body: exchange.body,
                    connection_id,
                    reused,
                    idle_duration,
                    not_pooled: returned.err(),
                    timings: Timings {
                        time_to_first_byte: exchange.time_to_first_byte,
                        total: started.elapsed(),
                    },
                };
                debug!(connection_id, reused, status = metadata.status, total = ?metadata.timings.total, "exchange complete");
                Ok(metadata)
            }
            Err(e) => {
                let reason = match e {
                    ExecuteError::Cancelled | ExecuteError::TimedOut => NotPooled::Cancelled,
                    _ => NotPooled::TransportError,
                };
                debug!(connection_id, reused, "exchange failed: {}", e);
                let _ = self.finish(conn, Err(reason), sink);
                Err(e)
            }
        }
    }

    /// A pool hit never suspends. On a miss, cancellation or the deadline can cut DNS
    /// or the handshake short; the interrupted stage still reports its `*Done` event.
    async fn obtain(&self,
                    destination: &DestinationKey,
                    sink: &dyn TraceSink,
                    cancel: &CancellationToken,
                    deadline: Option<Deadline>) -> Result<Obtained, ExecuteError> {
        if let Some((conn, idle)) = self.pool.acquire(destination) {
            return Ok(Obtained { conn, reused: true, idle_duration: Some(idle) });
        }

        let addrs = self.resolve(destination, sink, cancel, deadline).await?;
        let stream = self.connect(destination, &addrs, sink, cancel, deadline).await?;
        Ok(Obtained {
            conn: Connection::establish(destination.clone(), stream),
            reused: false,
            idle_duration: None,
        })
    }

    async fn resolve(&self,
                     destination: &DestinationKey,
                     sink: &dyn TraceSink,
                     cancel: &CancellationToken,
                     deadline: Option<Deadline>) -> Result<Vec<SocketAddr>, ExecuteError> {
        if let Some(ip) = destination.ip_literal() {
            return Ok(vec![SocketAddr::new(ip, destination.port())]);
        }

        let host = destination.host().to_string();
        emit(sink, TraceEvent::DnsStart { host: host.clone() });

        let lookup = interruptible(tokio::net::lookup_host((destination.host(), destination.port())), cancel, deadline).await;
        let resolved = match lookup {
            Ok(resolved) => resolved,
            Err(interrupted) => {
                emit(sink, TraceEvent::DnsDone { addrs: Vec::new(), error: Some(interrupted.to_string()) });
                return Err(interrupted);
            }
        };
        let resolved = resolved
            .map(|addrs| addrs.collect::<Vec<_>>())
            .and_then(|addrs| {
                if addrs.is_empty() {
                    Err(io::Error::new(io::ErrorKind::NotFound, "no addresses found"))
                } else {
                    Ok(addrs)
                }
            });

        match resolved {
            Ok(addrs) => {
                emit(sink, TraceEvent::DnsDone { addrs: addrs.clone(), error: None });
                Ok(addrs)
            }
            Err(source) => {
                emit(sink, TraceEvent::DnsDone { addrs: Vec::new(), error: Some(source.to_string()) });
                Err(ExecuteError::Resolution { host, source })
            }
        }
    }

    /// Tries each resolved address in order; the last failure is reported.
    async fn connect(&self,
                     destination: &DestinationKey,
                     addrs: &[SocketAddr],
                     sink: &dyn TraceSink,
                     cancel: &CancellationToken,
                     deadline: Option<Deadline>) -> Result<TcpStream, ExecuteError> {
        let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no addresses to connect to");

        for addr in addrs.iter().copied() {
            emit(sink, TraceEvent::ConnectStart { addr });
            let attempt = async {
                match self.config.connect_timeout {
                    Some(limit) => timeout(limit, TcpStream::connect(addr))
                        .await
                        .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))),
                    None => TcpStream::connect(addr).await,
                }
            };
            let connected = match interruptible(attempt, cancel, deadline).await {
                Ok(connected) => connected,
                Err(interrupted) => {
                    emit(sink, TraceEvent::ConnectDone { addr, error: Some(interrupted.to_string()) });
                    return Err(interrupted);
                }
            };

            match connected {
                Ok(stream) => {
                    emit(sink, TraceEvent::ConnectDone { addr, error: None });
                    return Ok(stream);
                }
                Err(e) => {
                    emit(sink, TraceEvent::ConnectDone { addr, error: Some(e.to_string()) });
                    last_error = e;
                }
            }
        }

        Err(ExecuteError::Handshake { destination: destination.clone(), source: last_error })
    }

    async fn exchange(&self,
                      conn: &mut Connection,
                      destination: &DestinationKey,
                      request: &RequestConfig,
                      sink: &dyn TraceSink,
                      started: Instant) -> Result<Exchange, ExecuteError> {
        let client_close = request.request_close() || self.config.disable_keep_alives;
        if client_close {
            conn.mark_not_reusable();
        }

        let wire = request.encode(destination, client_close, &self.config.user_agent);
        conn.record_request(request.request_line());

        let written = write_all(conn, &wire).await;
        emit(sink, TraceEvent::RequestWritten { ok: written.is_ok() });
        written.map_err(ExecuteError::Write)?;

        let head = read_response_head(conn.reader()).await?;
        let time_to_first_byte = started.elapsed();
        emit(sink, TraceEvent::FirstResponseByte);

        let server_close = head.wants_close();
        if server_close {
            conn.mark_not_reusable();
        }

        let framing = body_framing(request.method(), &head)?;
        let (body, drained) = if request.skip_body() && framing != BodyFraming::Empty {
            // Unknown offset into the stream from here on.
            conn.mark_not_reusable();
            (None, false)
        } else {
            (Some(read_body(conn.reader(), framing).await?), true)
        };

        let verdict = if client_close {
            Err(NotPooled::ClientRequestedClose)
        } else if server_close {
            Err(NotPooled::ServerRequestedClose)
        } else if !drained {
            Err(NotPooled::UndrainedBody)
        } else if framing == BodyFraming::UntilClose {
            Err(NotPooled::CloseDelimitedBody)
        } else {
            Ok(())
        };

        Ok(Exchange {
            version: head.version,
            status: head.status,
            reason: head.reason,
            headers: head.headers,
            body,
            time_to_first_byte,
            verdict,
        })
    }

    fn finish(&self, conn: Connection, verdict: Result<(), NotPooled>, sink: &dyn TraceSink) -> Result<(), NotPooled> {
        let connection_id = conn.id();
        let returned = match verdict {
            Ok(()) => {
                if self.pool.release(conn, true) {
                    Ok(())
                } else {
                    Err(NotPooled::PoolShutDown)
                }
            }
            Err(reason) => {
                self.pool.release(conn, false);
                Err(reason)
            }
        };

        emit(sink, TraceEvent::ConnectionReturnedToPool {
            connection_id,
            ok: returned.is_ok(),
            reason: returned.err(),
        });
        returned
    }
}

async fn write_all(conn: &mut Connection, wire: &[u8]) -> io::Result<()> {
    conn.writer().write_all(wire).await?;
    conn.writer().flush().await
}

/// Races `fut` against the cancel token and the request deadline. Cancellation wins ties.
async fn interruptible<F: Future>(fut: F,
                                  cancel: &CancellationToken,
                                  deadline: Option<Deadline>) -> Result<F::Output, ExecuteError> {
    select! {
        biased;
        _ = cancel.cancelled() => Err(ExecuteError::Cancelled),
        _ = sleep_until(deadline) => Err(ExecuteError::TimedOut),
        out = fut => Ok(out),
    }
}

async fn sleep_until(deadline: Option<Deadline>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
