//! Change-notification core: the signaler/observer mechanism that powers
//! long-poll and chunked-stream requests with heartbeat and coalescing
//! semantics (§4.8, §4.9).

pub mod async_observer;
pub mod error;
pub mod observer;

pub use async_observer::{AsyncObserver, CancelToken, ChunkHandler};
pub use error::AsyncObserverError;
pub use observer::{ChangeSignaler, Observer, WaitResult};
