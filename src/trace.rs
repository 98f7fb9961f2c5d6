//! Lifecycle events for one request/response cycle and the sinks that render them.
//!
//! Sinks are side channels. Whatever a sink does, including failing or panicking,
//! never changes the outcome of the exchange it observes.

use std::net::SocketAddr;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use anyhow::anyhow;
use tracing::{debug, info};
use crate::destination::DestinationKey;
use crate::errors::NotPooled;

#[derive(Clone, Debug, PartialEq)]
pub enum TraceEvent {
    GetConn { destination: DestinationKey },
    DnsStart { host: String },
    DnsDone { addrs: Vec<SocketAddr>, error: Option<String> },
    ConnectStart { addr: SocketAddr },
    ConnectDone { addr: SocketAddr, error: Option<String> },
    ConnectionObtained {
        connection_id: u64,
        reused: bool,
        was_idle: bool,
        idle_duration: Duration,
    },
    RequestWritten { ok: bool },
    FirstResponseByte,
    ConnectionReturnedToPool {
        connection_id: u64,
        ok: bool,
        reason: Option<NotPooled>,
    },
}

pub trait TraceSink: Send + Sync {
    fn record(&self, at: Instant, event: &TraceEvent) -> anyhow::Result<()>;
}

/// Hands `event` to `sink`, absorbing any error or panic the sink raises.
pub fn emit(sink: &dyn TraceSink, event: TraceEvent) {
    let at = Instant::now();
    match catch_unwind(AssertUnwindSafe(|| sink.record(at, &event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("trace sink failed on {:?}: {:#}", event, e),
        Err(_) => debug!("trace sink panicked on {:?}", event),
    }
}

pub fn render(event: &TraceEvent) -> String {
    match event {
        TraceEvent::GetConn { destination } => format!("Getting connection for {}", destination),
        TraceEvent::DnsStart { host } => format!("DNS lookup started for {}", host),
        TraceEvent::DnsDone { addrs, error: None } => format!("DNS lookup done: {:?}", addrs),
        TraceEvent::DnsDone { error: Some(e), .. } => format!("DNS error: {}", e),
        TraceEvent::ConnectStart { addr } => format!("Starting new connection to {}", addr),
        TraceEvent::ConnectDone { addr, error: None } => format!("Connection established to {}", addr),
        TraceEvent::ConnectDone { error: Some(e), .. } => format!("Connection error: {}", e),
        TraceEvent::ConnectionObtained { connection_id, reused, was_idle, idle_duration } => format!(
            "Got connection #{}: reused={}, wasIdle={}, idleTime={:?}",
            connection_id, reused, was_idle, idle_duration
        ),
        TraceEvent::RequestWritten { ok: true } => "Wrote request successfully".to_string(),
        TraceEvent::RequestWritten { ok: false } => "Error writing request".to_string(),
        TraceEvent::FirstResponseByte => "Got first response byte".to_string(),
        TraceEvent::ConnectionReturnedToPool { ok: true, .. } => {
            "Connection returned to pool successfully".to_string()
        }
        TraceEvent::ConnectionReturnedToPool { reason, .. } => match reason {
            Some(reason) => format!("Connection not returned to pool: {}", reason),
            None => "Connection not returned to pool".to_string(),
        },
    }
}

pub struct NoopSink;

impl TraceSink for NoopSink {
    fn record(&self, _at: Instant, _event: &TraceEvent) -> anyhow::Result<()> {
        Ok(())
    }
}

/// One `info!` line per event.
pub struct LogSink;

impl TraceSink for LogSink {
    fn record(&self, _at: Instant, event: &TraceEvent) -> anyhow::Result<()> {
        info!("{}", render(event));
        Ok(())
    }
}

#[derive(Default)]
struct TimingState {
    dns_start: Option<Instant>,
    dns_done: bool,
    connect_start: Option<Instant>,
    request_start: Option<Instant>,
}

/// Reports phase durations (DNS lookup, TCP handshake, idle time, TTFB) instead of raw events.
#[derive(Default)]
pub struct TimingSink {
    state: Mutex<TimingState>,
}

impl TimingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TraceSink for TimingSink {
    fn record(&self, at: Instant, event: &TraceEvent) -> anyhow::Result<()> {
        let mut state = self.state.lock().map_err(|_| anyhow!("timing state poisoned"))?;
        match event {
            TraceEvent::GetConn { .. } => {
                *state = TimingState { request_start: Some(at), ..TimingState::default() };
            }
            TraceEvent::DnsStart { .. } => state.dns_start = Some(at),
            TraceEvent::DnsDone { error, .. } => {
                state.dns_done = true;
                if let Some(e) = error {
                    info!("DNS error: {}", e);
                }
            }
            TraceEvent::ConnectStart { .. } => {
                if let (true, Some(dns_start)) = (state.dns_done, state.dns_start) {
                    info!("DNS lookup time: {:?}", at.duration_since(dns_start));
                }
                state.connect_start = Some(at);
            }
            TraceEvent::ConnectDone { error: Some(e), .. } => info!("Connect error: {}", e),
            TraceEvent::ConnectDone { error: None, .. } => {
                if let Some(connect_start) = state.connect_start {
                    info!("TCP handshake time: {:?}", at.duration_since(connect_start));
                }
            }
            TraceEvent::ConnectionObtained { reused, was_idle, idle_duration, .. } => {
                info!("Connection was reused: {}", reused);
                if *was_idle {
                    info!("Connection was idle for {:?}", idle_duration);
                }
            }
            TraceEvent::FirstResponseByte => {
                if let Some(request_start) = state.request_start {
                    info!("Time to first byte: {:?}", at.duration_since(request_start));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Keeps every event with its timestamp, in arrival order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(Instant, TraceEvent)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        match self.events.lock() {
            Ok(events) => events.iter().map(|(_, e)| e.clone()).collect(),
            Err(_) => Vec::new(),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    /// `(connection_id, reused, was_idle)` from the last `ConnectionObtained`.
    pub fn last_obtained(&self) -> Option<(u64, bool, bool)> {
        self.events().into_iter().rev().find_map(|event| match event {
            TraceEvent::ConnectionObtained { connection_id, reused, was_idle, .. } => {
                Some((connection_id, reused, was_idle))
            }
            _ => None,
        })
    }

    pub fn last_returned(&self) -> Option<(bool, Option<NotPooled>)> {
        self.events().into_iter().rev().find_map(|event| match event {
            TraceEvent::ConnectionReturnedToPool { ok, reason, .. } => Some((ok, reason)),
            _ => None,
        })
    }
}

impl TraceSink for RecordingSink {
    fn record(&self, at: Instant, event: &TraceEvent) -> anyhow::Result<()> {
        self.events
            .lock()
            .map_err(|_| anyhow!("recording sink poisoned"))?
            .push((at, event.clone()));
        Ok(())
    }
}

/// Fans every event out to two sinks. A failure in the first still reaches the second.
pub struct Tee<A, B>(pub A, pub B);

impl<A: TraceSink, B: TraceSink> TraceSink for Tee<A, B> {
    fn record(&self, at: Instant, event: &TraceEvent) -> anyhow::Result<()> {
        let first = self.0.record(at, event);
        self.1.record(at, event)?;
        first
    }
}

impl<T: TraceSink + ?Sized> TraceSink for &T {
    fn record(&self, at: Instant, event: &TraceEvent) -> anyhow::Result<()> {
        (**self).record(at, event)
    }
}
