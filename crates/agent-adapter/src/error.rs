use thiserror::Error;

/// Failure categories for an upstream agent session, keyed the same way
/// the session's own recovery table is keyed.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("connect or handshake failed: {0}")]
    RetryRequest(#[source] reqwest::Error),

    #[error("upstream instance id changed from {previous} to {current}")]
    InstanceIdChanged { previous: u64, current: u64 },

    #[error("upstream emitted an error document: {0}")]
    RestartStream(String),

    #[error("stream closed by peer")]
    StreamClosed,

    #[error("multipart stream could not be read: {0}")]
    MultipartStreamFailed(String),

    #[error("adapter failed and will not be retried: {0}")]
    AdapterFailed(String),

    #[error("malformed response document: {0}")]
    Parse(#[from] ParseError),
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("xml error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("unrecognised document root: {0}")]
    UnknownRoot(String),

    #[error("missing required attribute `{0}`")]
    MissingAttribute(&'static str),

    #[error("malformed agent version: {0}")]
    MalformedVersion(String),
}
