//! End-to-end reuse decisions against the scenario server on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use http_conn_reuse::demo;
use http_conn_reuse::executor::{ExecutorConfig, RequestExecutor};
use http_conn_reuse::pool::{ConnectionPool, PoolConfig};
use http_conn_reuse::scenario::{self, CLIENT_CLOSE_PATH, NORMAL_PATH, SERVER_CLOSE_PATH, SEVER_PATH};
use http_conn_reuse::server::ServerBuilder;
use http_conn_reuse::trace::{RecordingSink, TraceEvent};
use http_conn_reuse::{DestinationKey, ExecuteError, NotPooled, RequestConfig};

struct Harness {
    addr: SocketAddr,
    shutdown: CancellationToken,
    executor: RequestExecutor,
}

impl Harness {
    async fn start() -> Self {
        Self::start_with(None, ExecutorConfig::default()).await
    }

    async fn start_with(keep_alive_timeout: Option<Duration>, config: ExecutorConfig) -> Self {
        let mut builder = ServerBuilder::new();
        builder.host("127.0.0.1").port(0);
        if let Some(timeout) = keep_alive_timeout {
            builder.keep_alive_timeout(timeout);
        }
        scenario::register(&mut builder).unwrap();

        let listening = builder.build().bind().await.unwrap();
        let addr = listening.local_addr();
        let shutdown = CancellationToken::new();
        tokio::spawn(listening.serve(shutdown.clone()));

        let executor = RequestExecutor::with_config(Arc::new(ConnectionPool::new()), config);
        Harness { addr, shutdown, executor }
    }

    fn destination(&self) -> DestinationKey {
        DestinationKey::new("127.0.0.1", self.addr.port())
    }

    fn url(&self) -> String {
        format!("http://127.0.0.1:{}", self.addr.port())
    }

    async fn send(&self, request: RequestConfig, sink: &RecordingSink) -> Result<http_conn_reuse::ResponseMetadata, ExecuteError> {
        sink.clear();
        self.executor
            .execute(&self.destination(), &request, sink, &CancellationToken::new())
            .await
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn kind(event: &TraceEvent) -> &'static str {
    match event {
        TraceEvent::GetConn { .. } => "get_conn",
        TraceEvent::DnsStart { .. } => "dns_start",
        TraceEvent::DnsDone { .. } => "dns_done",
        TraceEvent::ConnectStart { .. } => "connect_start",
        TraceEvent::ConnectDone { .. } => "connect_done",
        TraceEvent::ConnectionObtained { .. } => "obtained",
        TraceEvent::RequestWritten { .. } => "written",
        TraceEvent::FirstResponseByte => "first_byte",
        TraceEvent::ConnectionReturnedToPool { .. } => "returned",
    }
}

#[tokio::test]
async fn drained_response_without_close_is_reused() {
    let h = Harness::start().await;
    let sink = RecordingSink::new();

    let first = h.send(RequestConfig::get(NORMAL_PATH), &sink).await.unwrap();
    assert_eq!(first.status, 200);
    assert!(!first.reused);
    assert!(first.returned_to_pool());
    assert_eq!(sink.last_returned(), Some((true, None)));
    assert_eq!(h.executor.pool().idle_count(&h.destination()), 1);

    let second = h.send(RequestConfig::get(NORMAL_PATH), &sink).await.unwrap();
    assert!(second.reused);
    assert_eq!(second.connection_id, first.connection_id);
    assert!(second.idle_duration.is_some());
    assert_eq!(sink.last_obtained(), Some((first.connection_id, true, true)));
    assert_eq!(
        second.body.as_deref(),
        Some(&b"This response body won't be read by client\n"[..])
    );
}

#[tokio::test]
async fn fresh_connection_trace_is_in_temporal_order() {
    let h = Harness::start().await;
    let sink = RecordingSink::new();
    h.send(RequestConfig::get(NORMAL_PATH), &sink).await.unwrap();

    let kinds: Vec<&str> = sink.events().iter().map(kind).collect();
    assert_eq!(
        kinds,
        vec!["get_conn", "connect_start", "connect_done", "obtained", "written", "first_byte", "returned"]
    );

    h.send(RequestConfig::get(NORMAL_PATH), &sink).await.unwrap();
    let kinds: Vec<&str> = sink.events().iter().map(kind).collect();
    assert_eq!(kinds, vec!["get_conn", "obtained", "written", "first_byte", "returned"]);
}

#[tokio::test]
async fn hostname_goes_through_dns_before_connecting() {
    let h = Harness::start().await;
    let sink = RecordingSink::new();
    let destination = DestinationKey::new("localhost", h.addr.port());

    let res = h.executor
        .execute(&destination, &RequestConfig::get("/"), &sink, &CancellationToken::new())
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(res.body.as_deref().unwrap()).starts_with("Response at "));

    let events = sink.events();
    let kinds: Vec<&str> = events.iter().map(kind).collect();
    assert_eq!(&kinds[..3], &["get_conn", "dns_start", "dns_done"]);
    let obtained = kinds.iter().position(|k| *k == "obtained").unwrap();
    assert!(events[..obtained]
        .iter()
        .any(|e| matches!(e, TraceEvent::ConnectDone { error: None, .. })));
}

#[tokio::test]
async fn client_close_directive_is_never_pooled() {
    let h = Harness::start().await;
    let sink = RecordingSink::new();

    let first = h.send(RequestConfig::get(CLIENT_CLOSE_PATH).with_close(true), &sink).await.unwrap();
    assert_eq!(first.status, 200);
    assert_eq!(first.header("x-client-connection"), Some("close"));
    assert_eq!(first.not_pooled, Some(NotPooled::ClientRequestedClose));
    assert_eq!(sink.last_returned(), Some((false, Some(NotPooled::ClientRequestedClose))));
    assert_eq!(h.executor.pool().idle_count(&h.destination()), 0);

    let second = h.send(RequestConfig::get(CLIENT_CLOSE_PATH), &sink).await.unwrap();
    assert!(!second.reused);
    assert_ne!(second.connection_id, first.connection_id);
    assert_eq!(sink.last_obtained().map(|(_, reused, _)| reused), Some(false));
}

#[tokio::test]
async fn server_close_directive_is_never_pooled() {
    let h = Harness::start().await;
    let sink = RecordingSink::new();

    let first = h.send(RequestConfig::get(SERVER_CLOSE_PATH), &sink).await.unwrap();
    assert_eq!(first.header("connection"), Some("close"));
    assert_eq!(first.not_pooled, Some(NotPooled::ServerRequestedClose));

    let second = h.send(RequestConfig::get(SERVER_CLOSE_PATH), &sink).await.unwrap();
    assert!(!second.reused);
}

#[tokio::test]
async fn undrained_body_discards_connection() {
    let h = Harness::start().await;
    let sink = RecordingSink::new();

    let first = h.send(RequestConfig::get(NORMAL_PATH).with_skip_body(true), &sink).await.unwrap();
    assert!(first.body.is_none());
    assert!(first.header("connection").is_none());
    assert_eq!(first.not_pooled, Some(NotPooled::UndrainedBody));
    assert_eq!(h.executor.pool().idle_count(&h.destination()), 0);

    let second = h.send(RequestConfig::get(NORMAL_PATH), &sink).await.unwrap();
    assert!(!second.reused);
}

#[tokio::test]
async fn mid_response_severance_is_surfaced_and_discarded() {
    let h = Harness::start().await;
    let sink = RecordingSink::new();

    match h.send(RequestConfig::get(SEVER_PATH), &sink).await {
        Err(ExecuteError::PrematureSeverance { declared, received }) => {
            assert_eq!(declared, scenario::SEVER_DECLARED_LENGTH);
            assert_eq!(received, scenario::SEVER_PARTIAL_BODY.len());
        }
        other => panic!("expected premature severance, got {:?}", other.map(|m| m.status)),
    }
    assert_eq!(sink.last_returned(), Some((false, Some(NotPooled::TransportError))));
    assert_eq!(h.executor.pool().idle_count(&h.destination()), 0);

    let again = h.send(RequestConfig::get(SEVER_PATH), &sink).await;
    assert!(matches!(again, Err(ExecuteError::PrematureSeverance { .. })));
    assert_eq!(sink.last_obtained().map(|(_, reused, _)| reused), Some(false));
}

#[tokio::test]
async fn unknown_path_still_keeps_the_connection() {
    let h = Harness::start().await;
    let sink = RecordingSink::new();

    let missing = h.send(RequestConfig::get("/nope"), &sink).await.unwrap();
    assert_eq!(missing.status, 404);
    assert!(missing.returned_to_pool());

    let next = h.send(RequestConfig::get(NORMAL_PATH), &sink).await.unwrap();
    assert!(next.reused);
}

#[tokio::test]
async fn disabled_keep_alives_never_reuse() {
    let config = ExecutorConfig { disable_keep_alives: true, ..ExecutorConfig::default() };
    let h = Harness::start_with(None, config).await;
    let sink = RecordingSink::new();

    for _ in 0..3 {
        let res = h.send(RequestConfig::get("/"), &sink).await.unwrap();
        assert!(!res.reused);
        assert_eq!(res.not_pooled, Some(NotPooled::ClientRequestedClose));
    }
}

#[tokio::test]
async fn server_keep_alive_timeout_makes_parked_connection_stale() {
    let h = Harness::start_with(Some(Duration::from_millis(100)), ExecutorConfig::default()).await;
    let sink = RecordingSink::new();

    let first = h.send(RequestConfig::get(NORMAL_PATH), &sink).await.unwrap();
    assert!(first.returned_to_pool());

    tokio::time::sleep(Duration::from_millis(400)).await;

    let second = h.send(RequestConfig::get(NORMAL_PATH), &sink).await.unwrap();
    assert!(!second.reused);
    assert_eq!(second.status, 200);
}

#[tokio::test]
async fn pool_idle_timeout_forces_a_new_connection() {
    let h = Harness::start().await;
    let executor = RequestExecutor::new(Arc::new(ConnectionPool::with_config(PoolConfig {
        idle_timeout: Duration::from_millis(50),
        ..PoolConfig::default()
    })));
    let sink = RecordingSink::new();
    let cancel = CancellationToken::new();

    executor.execute(&h.destination(), &RequestConfig::get(NORMAL_PATH), &sink, &cancel).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    let second = executor.execute(&h.destination(), &RequestConfig::get(NORMAL_PATH), &sink, &cancel).await.unwrap();
    assert!(!second.reused);
}

#[tokio::test]
async fn shut_down_pool_closes_clean_connections() {
    let h = Harness::start().await;
    let sink = RecordingSink::new();
    h.executor.pool().shutdown();

    let res = h.send(RequestConfig::get(NORMAL_PATH), &sink).await.unwrap();
    assert_eq!(res.not_pooled, Some(NotPooled::PoolShutDown));
    assert_eq!(sink.last_returned(), Some((false, Some(NotPooled::PoolShutDown))));
}

// A peer that accepts and then never answers.
async fn silent_server() -> (DestinationKey, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    (DestinationKey::new("127.0.0.1", port), handle)
}

#[tokio::test]
async fn cancellation_aborts_read_and_discards_connection() {
    let (destination, server) = silent_server().await;
    let executor = RequestExecutor::new(Arc::new(ConnectionPool::new()));
    let sink = RecordingSink::new();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = executor.execute(&destination, &RequestConfig::get("/"), &sink, &cancel).await;
    assert!(matches!(result, Err(ExecuteError::Cancelled)));
    assert_eq!(sink.last_returned(), Some((false, Some(NotPooled::Cancelled))));
    assert_eq!(executor.pool().idle_count(&destination), 0);
    server.abort();
}

#[tokio::test]
async fn cancellation_during_handshake_closes_the_connect_event() {
    let h = Harness::start().await;
    let sink = RecordingSink::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = h.executor.execute(&h.destination(), &RequestConfig::get("/"), &sink, &cancel).await;
    assert!(matches!(result, Err(ExecuteError::Cancelled)));

    let events = sink.events();
    let kinds: Vec<&str> = events.iter().map(kind).collect();
    assert_eq!(kinds, vec!["get_conn", "connect_start", "connect_done"]);
    assert!(matches!(&events[2], TraceEvent::ConnectDone { error: Some(e), .. } if e.contains("cancelled")));
}

#[tokio::test]
async fn deadline_during_handshake_closes_the_connect_event() {
    let config = ExecutorConfig { request_timeout: Some(Duration::ZERO), ..ExecutorConfig::default() };
    let h = Harness::start_with(None, config).await;
    let sink = RecordingSink::new();

    let result = h.send(RequestConfig::get("/"), &sink).await;
    assert!(matches!(result, Err(ExecuteError::TimedOut)));
    assert!(matches!(
        sink.events().last(),
        Some(TraceEvent::ConnectDone { error: Some(e), .. }) if e.contains("timed out")
    ));
    assert!(sink.last_obtained().is_none());
}

#[tokio::test]
async fn cancellation_during_dns_closes_the_dns_event() {
    let h = Harness::start().await;
    let sink = RecordingSink::new();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let destination = DestinationKey::new("localhost", h.addr.port());

    let result = h.executor.execute(&destination, &RequestConfig::get("/"), &sink, &cancel).await;
    assert!(matches!(result, Err(ExecuteError::Cancelled)));

    let events = sink.events();
    let kinds: Vec<&str> = events.iter().map(kind).collect();
    assert_eq!(kinds, vec!["get_conn", "dns_start", "dns_done"]);
    assert!(matches!(&events[2], TraceEvent::DnsDone { error: Some(_), .. }));
}

#[tokio::test]
async fn absurd_declared_length_is_an_error_not_a_crash() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let destination = DestinationKey::new("127.0.0.1", listener.local_addr().unwrap().port());
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 1024];
        let _ = stream.read(&mut request).await;
        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\nabc")
            .await
            .unwrap();
        stream.shutdown().await.unwrap();
    });

    let executor = RequestExecutor::new(Arc::new(ConnectionPool::new()));
    let sink = RecordingSink::new();
    let result = executor.execute(&destination, &RequestConfig::get("/"), &sink, &CancellationToken::new()).await;
    assert!(matches!(result, Err(ExecuteError::PrematureSeverance { received: 3, .. })));
    assert_eq!(sink.last_returned(), Some((false, Some(NotPooled::TransportError))));
    server.await.unwrap();
}

#[tokio::test]
async fn request_timeout_is_reported_as_timed_out() {
    let (destination, server) = silent_server().await;
    let config = ExecutorConfig { request_timeout: Some(Duration::from_millis(100)), ..ExecutorConfig::default() };
    let executor = RequestExecutor::with_config(Arc::new(ConnectionPool::new()), config);
    let sink = RecordingSink::new();

    let result = executor.execute(&destination, &RequestConfig::get("/"), &sink, &CancellationToken::new()).await;
    assert!(matches!(result, Err(ExecuteError::TimedOut)));
    assert_eq!(sink.last_returned(), Some((false, Some(NotPooled::Cancelled))));
    server.abort();
}

#[tokio::test]
async fn refused_connection_is_a_handshake_failure() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let executor = RequestExecutor::new(Arc::new(ConnectionPool::new()));
    let sink = RecordingSink::new();
    let destination = DestinationKey::new("127.0.0.1", port);

    let result = executor.execute(&destination, &RequestConfig::get("/"), &sink, &CancellationToken::new()).await;
    assert!(matches!(result, Err(ExecuteError::Handshake { .. })));
    assert!(sink
        .events()
        .iter()
        .any(|e| matches!(e, TraceEvent::ConnectDone { error: Some(_), .. })));
    assert!(sink.last_obtained().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_executions_share_the_pool_safely() {
    let h = Arc::new(Harness::start().await);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            let sink = RecordingSink::new();
            for _ in 0..3 {
                let res = h.send(RequestConfig::get(NORMAL_PATH), &sink).await.unwrap();
                assert_eq!(res.status, 200);
                assert!(res.returned_to_pool());
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let idle = h.executor.pool().idle_count(&h.destination());
    assert!(idle >= 1 && idle <= h.executor.pool().config().max_idle_per_destination);
}

#[tokio::test]
async fn case_walkthrough_matches_expected_reuse() {
    let h = Harness::start().await;
    let outcomes = demo::run_cases(&h.executor, &h.url()).await;
    assert_eq!(outcomes.len(), 4);

    // skip body, client close, server close: the provoking request is never pooled
    // and the follow-up has to dial again.
    for outcome in &outcomes[..3] {
        assert_eq!(outcome.first, Ok(false), "{}", outcome.name);
        assert_eq!(outcome.second_reused, Some(false), "{}", outcome.name);
    }
    assert!(outcomes[3].first.is_err());
    assert_eq!(outcomes[3].second_reused, None);
}

#[tokio::test]
async fn no_reuse_demo_dials_every_time() {
    let h = Harness::start().await;
    let responses = demo::run_no_reuse(&h.url(), 2, Duration::from_millis(10)).await.unwrap();
    assert_eq!(responses.len(), 2);
    assert!(responses.iter().all(|r| !r.reused));
    assert!(responses.iter().all(|r| r.header("connection") == Some("close")));
}
