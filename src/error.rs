use std::{io, time::Duration};

use thiserror::Error as ThisError;

/// Boxed error type returned by handlers and the pre-handler. Any error type
/// (and plain strings, via `.into()`) converts into it with `?`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("invalid route template {template:?}: {reason}")]
    InvalidPattern { template: String, reason: String },
    #[error("invalid HTTP method list {0:?}")]
    InvalidMethods(String),
    #[error("invalid response header {0:?}")]
    InvalidHeader(String),
    #[error("invalid host {0:?}, expected \"localhost\", \"127.0.0.1\", \"*\" or \"+\"")]
    InvalidHost(String),
    #[error("bind TCP listener: {0}")]
    BindTCPListener(io::Error),
    #[error("get TCP listener socket address: {0}")]
    GetTCPListenerAddress(io::Error),
    #[error("req_count did not reach {target_count} within {timeout:?} (current count: {current_count})")]
    AwaitReqCountTimeout {
        current_count: u64,
        target_count: u64,
        timeout: Duration,
    },
    #[error("read request body: {0}")]
    ReadBody(hyper::Error),
    #[error("request task failed: {0}")]
    Task(tokio::task::JoinError),
    #[error("pre-handler failed: {0}")]
    PreHandler(String),
}
