use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};
use crate::connection::ConnectionOwner;
use crate::connection_reader::Http11Handler;
use crate::dispatcher::Dispatcher;
use crate::http_object::HttpResponse;
use crate::http_status::HttpStatus;

/// Drives one accepted connection through as many request/response exchanges as
/// both peers allow.
pub struct NetworkConnector {
    dispatcher: Arc<Dispatcher>,
    keep_alive_timeout: Option<Duration>,
}

impl NetworkConnector {

    pub fn with(dispatcher: Arc<Dispatcher>, keep_alive_timeout: Option<Duration>) -> Self {
        NetworkConnector { dispatcher, keep_alive_timeout }
    }

    pub async fn handle(&self, tcp_stream: TcpStream) {
        let peer = tcp_stream.peer_addr().ok();
        debug!(?peer, "connection accepted");

        let mut owner = ConnectionOwner::with(tcp_stream);
        let mut handler = Http11Handler::new();
        let mut served = 0usize;

        loop {
            let next = match self.keep_alive_timeout {
                Some(limit) => match timeout(limit, handler.handle(owner.reader())).await {
                    Ok(next) => next,
                    Err(_) => {
                        debug!(?peer, served, "keep-alive timeout elapsed, closing");
                        break;
                    }
                },
                None => handler.handle(owner.reader()).await,
            };

            let req_ctx = match next {
                Ok(Some(req_ctx)) => req_ctx,
                Ok(None) => {
                    debug!(?peer, served, "peer closed the connection");
                    break;
                }
                Err(e) => {
                    debug!(?peer, "malformed request: {:#}", e);
                    let res = HttpResponse::with_status_code(HttpStatus::BadRequest);
                    // The peer may already be gone.
                    let _ = owner.response(&res, true).await;
                    break;
                }
            };

            let client_close = req_ctx.should_close();
            let res = self.dispatcher.dispatch(req_ctx.into());
            served += 1;

            if res.should_sever() {
                if let Err(e) = owner.sever(&res).await {
                    warn!(?peer, "failed to sever connection: {:#}", e);
                }
                return;
            }

            let close = client_close || res.wants_close();
            if let Err(e) = owner.response(&res, close).await {
                warn!(?peer, "Error occured {:#}. client may not receive response from server.", e);
                break;
            }

            if close {
                debug!(?peer, served, client_close, "should close");
                break;
            }
        }
    }
}
