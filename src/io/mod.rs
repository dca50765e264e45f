//! I/O - external interfaces
//!
//! - `http` - hyper HTTP adapter (curfews, movements, long-poll, movement streams)
//! - `prometheus` - Prometheus text formatting for `/metrics`

pub mod http;
pub mod prometheus;

pub use http::{serve, start_http_server, ApiError, HttpState, STREAM_ID_HEADER};
