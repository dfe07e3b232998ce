use thiserror::Error;

#[derive(Debug, Error)]
pub enum AsyncObserverError {
    /// The service or subscription was cancelled mid-stream (§7,
    /// "consumer-side errors").
    #[error("stream cancelled")]
    Cancelled,

    /// `sequence < firstSequence`: the client fell too far behind the
    /// buffer's retained window.
    #[error("client fell too far behind the buffer")]
    ClientFellTooFarBehind,

    /// The chunk handler itself failed (e.g. serialisation error).
    #[error("chunk handler failed: {0}")]
    Handler(String),
}
