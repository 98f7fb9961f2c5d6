//! HTTP/1.1 connection reuse: a client-side pool and request executor that decide,
//! exchange by exchange, whether a connection may carry the next request, plus a
//! small scenario server that provokes every reuse and no-reuse branch.

pub mod connection;
pub mod connection_reader;
pub mod demo;
pub mod destination;
pub mod dispatcher;
pub mod errors;
pub mod executor;
pub mod http_11_headers;
pub mod http_object;
pub mod http_request_context;
pub mod http_status;
pub mod http_type;
pub mod network_connector;
pub mod pool;
pub mod pooled_connection;
pub mod request_config;
pub mod response_reader;
pub mod scenario;
pub mod server;
pub mod trace;

pub use destination::DestinationKey;
pub use errors::{ExecuteError, NotPooled};
pub use executor::{ExecutorConfig, RequestExecutor, ResponseMetadata, Timings};
pub use pool::{ConnectionPool, PoolConfig};
pub use request_config::RequestConfig;
pub use trace::{TraceEvent, TraceSink};
