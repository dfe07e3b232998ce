//! Async Observer: the streaming orchestrator driving long-poll and
//! chunked-stream requests (§4.9).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use buffer::CircularBuffer;
use device_model::Sequence;
use log::debug;
use tokio::time::Instant;

use crate::error::AsyncObserverError;
use crate::observer::{Observer, WaitResult};

/// Produces the next chunk of a streaming response starting at `sequence`.
/// Returns the sequence to resume from and whether the buffer's current
/// end was reached.
#[async_trait]
pub trait ChunkHandler: Send + Sync {
    async fn handle(&self, sequence: Sequence) -> Result<(Sequence, bool), AsyncObserverError>;
}

/// Cooperative cancellation flag shared between a response task and
/// whatever holds the handle that can cancel it (e.g. client disconnect).
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct AsyncObserver<H: ChunkHandler> {
    observer: Observer,
    buffer: Arc<CircularBuffer>,
    handler: H,
    sequence: Sequence,
    end_of_buffer: bool,
    interval: Duration,
    heartbeat: Duration,
    last: Instant,
    cancel: CancelToken,
}

impl<H: ChunkHandler> AsyncObserver<H> {
    pub fn new(
        observer: Observer,
        buffer: Arc<CircularBuffer>,
        handler: H,
        start_sequence: Sequence,
        interval: Duration,
        heartbeat: Duration,
        cancel: CancelToken,
    ) -> Self {
        Self {
            observer,
            buffer,
            handler,
            sequence: start_sequence,
            end_of_buffer: false,
            interval,
            heartbeat,
            last: Instant::now(),
            cancel,
        }
    }

    /// Drives the loop described in §4.9 until the handler errors or the
    /// caller cancels. Cancellation detaches the observer from its
    /// signaler idempotently.
    pub async fn run(mut self) -> Result<(), AsyncObserverError> {
        loop {
            let signalled = if self.end_of_buffer {
                match self.observer.wait_for_signal(self.heartbeat).await {
                    WaitResult::Signalled(seq) => {
                        self.observer.reset();
                        Some(seq)
                    }
                    WaitResult::TimedOut => None,
                }
            } else {
                None
            };

            if self.cancel.is_cancelled() {
                self.observer.reset();
                return Err(AsyncObserverError::Cancelled);
            }

            if self.end_of_buffer {
                match signalled {
                    None => {
                        debug!("rebasing to buffer end, no signal received within heartbeat");
                        self.sequence = self.buffer.next_sequence();
                    }
                    Some(seq) => {
                        let elapsed = self.last.elapsed();
                        if elapsed < self.interval {
                            tokio::time::sleep(self.interval - elapsed).await;
                        }
                        self.sequence = seq;
                    }
                }
            }

            if self.sequence < self.buffer.first_sequence() {
                self.observer.reset();
                return Err(AsyncObserverError::ClientFellTooFarBehind);
            }

            let (next_sequence, end_of_buffer) = self.handler.handle(self.sequence).await?;
            self.sequence = next_sequence;
            self.end_of_buffer = end_of_buffer;
            self.last = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_model::{Observation, ObservationValue};
    use std::sync::atomic::AtomicU64;

    struct CountingHandler {
        calls: AtomicU64,
        fail_after: u64,
    }

    #[async_trait]
    impl ChunkHandler for CountingHandler {
        async fn handle(&self, sequence: Sequence) -> Result<(Sequence, bool), AsyncObserverError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call >= self.fail_after {
                return Err(AsyncObserverError::Handler("stop".to_string()));
            }
            Ok((sequence + 1, true))
        }
    }

    fn obs(id: &str, seq: Sequence) -> Observation {
        Observation {
            data_item_id: id.to_string(),
            name: None,
            sub_type: None,
            statistic: None,
            composition_id: None,
            sequence: seq,
            timestamp: jiff::Timestamp::now(),
            unavailable: false,
            reset_triggered: None,
            value: ObservationValue::Event("x".to_string()),
        }
    }

    #[tokio::test]
    async fn fails_when_client_fell_too_far_behind() {
        let buffer = Arc::new(CircularBuffer::new(4, 2));
        for i in 0..10 {
            buffer.append(obs("a", i));
        }

        let observer = Observer::new();
        let handler = CountingHandler { calls: AtomicU64::new(0), fail_after: 100 };
        let async_observer =
            AsyncObserver::new(observer, buffer, handler, 0, Duration::from_millis(1), Duration::from_millis(50), CancelToken::new());

        let err = async_observer.run().await.unwrap_err();
        assert!(matches!(err, AsyncObserverError::ClientFellTooFarBehind));
    }

    #[tokio::test]
    async fn cancellation_detaches_and_stops_the_loop() {
        let buffer = Arc::new(CircularBuffer::new(16, 4));
        buffer.append(obs("a", 0));

        let observer = Observer::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let handler = CountingHandler { calls: AtomicU64::new(0), fail_after: 100 };
        let async_observer =
            AsyncObserver::new(observer, buffer, handler, 0, Duration::from_millis(1), Duration::from_millis(5), cancel);

        let err = async_observer.run().await.unwrap_err();
        assert!(matches!(err, AsyncObserverError::Cancelled) || matches!(err, AsyncObserverError::ClientFellTooFarBehind));
    }
}
