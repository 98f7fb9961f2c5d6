use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Context;
use tokio::net::TcpListener;
use tokio::select;
use tokio::task::spawn;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use crate::dispatcher::{Dispatcher, Handler};
use crate::http_type::Method;
use crate::network_connector::NetworkConnector;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8080;

pub struct ServerBuilder<'a> {
    host: Option<&'a str>,
    port: Option<u16>,
    keep_alive_timeout: Option<Duration>,
    dispatcher: Dispatcher
}


impl <'a> ServerBuilder<'a> {

    pub fn new() -> Self {
        ServerBuilder{host: None, port: None, keep_alive_timeout: None, dispatcher: Dispatcher::new()}
    }

    pub fn host(&mut self, host: &'a str) -> &mut Self {
        self.host.replace(host);
        self
    }

    /// Port 0 asks the OS for an ephemeral port, see [`ListeningServer::local_addr`].
    pub fn port(&mut self, port: u16) -> &mut Self {
        self.port.replace(port);
        self
    }

    /// Close connections that sit idle between requests for longer than `timeout`.
    pub fn keep_alive_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.keep_alive_timeout.replace(timeout);
        self
    }

    pub fn add(&mut self, method: Method, path: &str, handler: Handler) -> anyhow::Result<&mut Self> {
        self.dispatcher.add(method, path, handler)?;
        Ok(self)
    }

    pub fn build(self) -> Server {
        Server {
            host: self.host.unwrap_or(DEFAULT_HOST).to_string(),
            port: self.port.unwrap_or(DEFAULT_PORT),
            keep_alive_timeout: self.keep_alive_timeout,
            dispatcher: Arc::new(self.dispatcher)
        }
    }
}

impl Default for ServerBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}


pub struct Server {
    host: String,
    port: u16,
    keep_alive_timeout: Option<Duration>,
    dispatcher: Arc<Dispatcher>
}

impl Server {

    pub async fn bind(self) -> anyhow::Result<ListeningServer> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        let local_addr = listener.local_addr()?;

        Ok(ListeningServer {
            listener,
            local_addr,
            connector: Arc::new(NetworkConnector::with(self.dispatcher, self.keep_alive_timeout)),
        })
    }
}


pub struct ListeningServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    connector: Arc<NetworkConnector>,
}

impl ListeningServer {

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts until `shutdown` fires. Connections already accepted run to completion
    /// on their own tasks.
    pub async fn serve(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        info!("Server listening on {}", self.local_addr);
        let mut incoming = TcpListenerStream::new(self.listener);

        loop {
            let next = select! {
                biased;
                _ = shutdown.cancelled() => break,
                next = incoming.next() => next,
            };

            match next {
                Some(Ok(tcp_stream)) => {
                    // Move an Arc clone into the task so the future owns everything it
                    // touches and satisfies spawn's 'static bound.
                    let connector = self.connector.clone();
                    spawn(async move {
                        connector.handle(tcp_stream).await
                    });
                }
                Some(Err(e)) => warn!("accept failed: {}", e),
                None => break,
            }
        }

        info!("Server on {} stopped accepting", self.local_addr);
        Ok(())
    }
}
