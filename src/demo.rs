//! Client drivers that walk a scenario server through each reuse outcome and log
//! what happened.

use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use crate::destination::parse_url;
use crate::executor::{ExecutorConfig, RequestExecutor, ResponseMetadata};
use crate::http_11_headers::CONNECTION;
use crate::pool::ConnectionPool;
use crate::request_config::RequestConfig;
use crate::scenario::{CLIENT_CLOSE_PATH, NORMAL_PATH, SERVER_CLOSE_PATH, SEVER_PATH};
use crate::trace::{LogSink, TimingSink, TraceSink};

#[derive(Debug, Clone)]
pub struct CaseOutcome {
    pub name: &'static str,
    /// `Err` holds the rendered failure of the provoking request.
    pub first: Result<bool, String>,
    /// Whether the follow-up request got a pooled connection. `None` if it failed.
    pub second_reused: Option<bool>,
}

struct Case {
    name: &'static str,
    path: &'static str,
    first: fn(&'static str) -> RequestConfig,
}

fn skipping_body(path: &'static str) -> RequestConfig {
    RequestConfig::get(path).with_skip_body(true)
}

fn closing(path: &'static str) -> RequestConfig {
    RequestConfig::get(path).with_close(true)
}

fn plain(path: &'static str) -> RequestConfig {
    RequestConfig::get(path)
}

const CASES: [Case; 4] = [
    Case { name: "Not reading response body", path: NORMAL_PATH, first: skipping_body },
    Case { name: "Client requesting connection close", path: CLIENT_CLOSE_PATH, first: closing },
    Case { name: "Server forcing connection close", path: SERVER_CLOSE_PATH, first: plain },
    Case { name: "Server closing connection mid-response", path: SEVER_PATH, first: plain },
];

/// Sends one request and logs the response the way the case walk-through expects.
pub async fn make_request(executor: &RequestExecutor,
                          url: &str,
                          request: &RequestConfig,
                          sink: &dyn TraceSink) -> Result<ResponseMetadata> {
    let (destination, _) = parse_url(url)?;

    info!("=== Making request to {} ===", url);
    let cancel = CancellationToken::new();
    match executor.execute(&destination, request, sink, &cancel).await {
        Ok(metadata) => {
            info!("Response status: {} {}", metadata.status, metadata.reason);
            info!("Response Connection header: {}", metadata.header(CONNECTION).unwrap_or(""));
            info!("=== Request complete ===");
            Ok(metadata)
        }
        Err(e) => {
            warn!("Request error: {}", e);
            Err(e.into())
        }
    }
}

/// Each case sends a request that provokes one condition, then a plain follow-up
/// to the same path to show whether the connection survived.
pub async fn run_cases(executor: &RequestExecutor, base_url: &str) -> Vec<CaseOutcome> {
    let base_url = base_url.trim_end_matches('/');
    let mut outcomes = Vec::with_capacity(CASES.len());

    for (idx, case) in CASES.iter().enumerate() {
        info!("--- Case {}: {} ---", idx + 1, case.name);
        let url = format!("{}{}", base_url, case.path);
        let sink = LogSink;

        let first = make_request(executor, &url, &(case.first)(case.path), &sink)
            .await
            .map(|metadata| metadata.returned_to_pool())
            .map_err(|e| format!("{:#}", e));

        let second_reused = make_request(executor, &url, &plain(case.path), &sink)
            .await
            .ok()
            .map(|metadata| metadata.reused);

        outcomes.push(CaseOutcome { name: case.name, first, second_reused });
    }
    outcomes
}

/// Keep-alives disabled: every request opens and tears down its own connection.
pub async fn run_no_reuse(base_url: &str, count: usize, pause: Duration) -> Result<Vec<ResponseMetadata>> {
    let executor = RequestExecutor::with_config(
        Arc::new(ConnectionPool::new()),
        ExecutorConfig { disable_keep_alives: true, ..ExecutorConfig::default() },
    );

    let mut responses = Vec::with_capacity(count);
    for n in 1..=count {
        info!("--- Request {} ---", n);
        let sink = TimingSink::new();
        let metadata = make_request(&executor, base_url, &RequestConfig::get(path_of(base_url)?), &sink).await?;
        log_timing(&metadata);
        responses.push(metadata);

        if n < count {
            tokio::time::sleep(pause).await;
        }
    }
    Ok(responses)
}

/// One request with DNS, handshake and first-byte timings.
pub async fn run_timing(base_url: &str) -> Result<ResponseMetadata> {
    let executor = RequestExecutor::new(Arc::new(ConnectionPool::new()));
    let sink = TimingSink::new();
    let metadata = make_request(&executor, base_url, &RequestConfig::get(path_of(base_url)?), &sink).await?;
    log_timing(&metadata);
    Ok(metadata)
}

fn log_timing(metadata: &ResponseMetadata) {
    if let Some(body) = &metadata.body {
        info!("Server response: {}", String::from_utf8_lossy(body).trim_end());
    }
    info!("Connection header: {}", metadata.header(CONNECTION).unwrap_or(""));
    info!("{}", metadata.summary());
}

fn path_of(url: &str) -> Result<String> {
    parse_url(url).map(|(_, path)| path)
}
