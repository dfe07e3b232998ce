use thiserror::Error;

/// Transport-level errors. All are retried after `reconnectInterval`
/// by the connector's own run loop; none of them are fatal.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("read failed: {0}")]
    Read(#[source] std::io::Error),

    #[error("write failed: {0}")]
    Write(#[source] std::io::Error),

    #[error("connection closed by peer")]
    StreamClosed,

    #[error("no data or heartbeat received within the inactivity timeout")]
    InactivityTimeout,
}
