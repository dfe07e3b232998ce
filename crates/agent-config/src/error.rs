use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("buffer size must be a power of two, got {0}")]
    BufferSizeNotPowerOfTwo(usize),

    #[error("no sources configured; the agent needs at least one [[sources]] entry")]
    NoSources,
}
