use thiserror::Error;

/// Buffer-side errors surfaced to a consumer (§7, "consumer-side errors").
#[derive(Debug, Error)]
pub enum BufferError {
    /// `sequence < firstSequence`: the requested starting point has already
    /// been evicted from the ring. Maps to a bounded HTTP 404 at the async
    /// observer.
    #[error("requested sequence {requested} is older than the oldest retained sequence {first_sequence}")]
    ClientFellTooFarBehind { requested: u64, first_sequence: u64 },
}
