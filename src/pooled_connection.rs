use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;
use crate::destination::DestinationKey;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Client side of one established TCP stream.
///
/// Owned by the pool while parked and by exactly one exchange while in use, so no
/// locking is needed around the halves.
pub struct Connection {
    id: u64,
    destination: DestinationKey,
    peer: Option<SocketAddr>,
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    idle_since: Option<Instant>,
    reusable: bool,
    requests: Vec<String>,
}

impl Connection {

    pub fn establish(destination: DestinationKey, tcp_stream: TcpStream) -> Self {
        // Small request/response exchanges; Nagle only adds latency here.
        let _ = tcp_stream.set_nodelay(true);
        let peer = tcp_stream.peer_addr().ok();
        let (read_half, write_half) = tcp_stream.into_split();

        Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            destination,
            peer,
            reader: BufReader::new(read_half),
            writer: BufWriter::new(write_half),
            idle_since: None,
            reusable: true,
            requests: Vec::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn destination(&self) -> &DestinationKey {
        &self.destination
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn reader(&mut self) -> &mut BufReader<OwnedReadHalf> {
        &mut self.reader
    }

    pub fn writer(&mut self) -> &mut BufWriter<OwnedWriteHalf> {
        &mut self.writer
    }

    /// Sticky: once a connection is marked it can never be parked again.
    pub fn mark_not_reusable(&mut self) {
        self.reusable = false;
    }

    pub fn is_reusable(&self) -> bool {
        self.reusable
    }

    pub fn record_request(&mut self, request_line: impl Into<String>) {
        self.requests.push(request_line.into());
    }

    /// Request lines sent so far, oldest first.
    pub fn requests(&self) -> &[String] {
        &self.requests
    }

    pub(crate) fn park(&mut self, now: Instant) {
        self.idle_since = Some(now);
    }

    pub(crate) fn unpark(&mut self) {
        self.idle_since = None;
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        self.idle_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or(Duration::ZERO)
    }

    /// A parked connection is stale when the peer already hung up or sent bytes
    /// nobody asked for. Either way the next exchange would start out of sync.
    pub(crate) fn is_stale(&self) -> bool {
        if !self.reader.buffer().is_empty() {
            return true;
        }
        let mut probe = [0u8; 1];
        match self.reader.get_ref().try_read(&mut probe) {
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Ok(_) | Err(_) => true,
        }
    }

    pub fn close(self) {
        debug!(
            connection_id = self.id,
            destination = %self.destination,
            requests = self.requests.len(),
            "closing connection"
        );
        // Dropping both halves closes the socket.
    }
}
