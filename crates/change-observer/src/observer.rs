//! Change Signaler / Observer (§4.8).
//!
//! An observer is bound to one logical lane of work (one streaming
//! response); it carries a recorded sequence hint, a cancellable wait, and
//! a no-cancel-on-signal flag used by [`Observer::wait_for`]. A signaler
//! owns a set of observers by weak reference so destroying either side
//! deregisters cleanly without touching freed memory.

use std::sync::{Arc, Weak};
use std::time::Duration;

use device_model::Sequence;
use parking_lot::Mutex;
use tokio::sync::Notify;

struct State {
    recorded_sequence: Option<Sequence>,
    no_cancel_on_signal: bool,
}

struct ObserverInner {
    state: Mutex<State>,
    notify: Notify,
}

#[derive(Debug, PartialEq, Eq)]
pub enum WaitResult {
    Signalled(Sequence),
    TimedOut,
}

/// A single observer. Cheaply cloneable (`Arc`-backed); clones refer to the
/// same underlying wait state.
#[derive(Clone)]
pub struct Observer {
    inner: Arc<ObserverInner>,
}

impl Default for Observer {
    fn default() -> Self {
        Self::new()
    }
}

impl Observer {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ObserverInner {
                state: Mutex::new(State { recorded_sequence: None, no_cancel_on_signal: false }),
                notify: Notify::new(),
            }),
        }
    }

    fn downgrade(&self) -> Weak<ObserverInner> {
        Arc::downgrade(&self.inner)
    }

    /// Records the earliest sequence signalled since the last [`Self::reset`]
    /// and, unless `wait_for` disabled cancellation, wakes any waiter.
    pub fn signal(&self, sequence: Sequence) {
        let mut state = self.inner.state.lock();
        state.recorded_sequence = Some(match state.recorded_sequence {
            Some(current) => current.min(sequence),
            None => sequence,
        });
        let cancel = !state.no_cancel_on_signal;
        drop(state);
        if cancel {
            self.inner.notify.notify_one();
        }
    }

    pub fn reset(&self) {
        let mut state = self.inner.state.lock();
        state.recorded_sequence = None;
        state.no_cancel_on_signal = false;
    }

    /// If a signal already arrived, returns immediately. Otherwise waits up
    /// to `duration`, returning early the moment a signal arrives.
    pub async fn wait_for_signal(&self, duration: Duration) -> WaitResult {
        {
            let mut state = self.inner.state.lock();
            state.no_cancel_on_signal = false;
            if let Some(seq) = state.recorded_sequence.take() {
                return WaitResult::Signalled(seq);
            }
        }

        tokio::select! {
            _ = self.inner.notify.notified() => {
                let mut state = self.inner.state.lock();
                WaitResult::Signalled(state.recorded_sequence.take().unwrap_or(0))
            }
            _ = tokio::time::sleep(duration) => WaitResult::TimedOut,
        }
    }

    /// Waits the full `duration` regardless of intervening signals (used
    /// for paced chunking); any signal that arrived is still recorded and
    /// returned at expiry.
    pub async fn wait_for(&self, duration: Duration) -> WaitResult {
        {
            let mut state = self.inner.state.lock();
            state.no_cancel_on_signal = true;
        }

        tokio::time::sleep(duration).await;

        let mut state = self.inner.state.lock();
        state.no_cancel_on_signal = false;
        match state.recorded_sequence.take() {
            Some(seq) => WaitResult::Signalled(seq),
            None => WaitResult::TimedOut,
        }
    }
}

/// Owns a set of observers by weak reference and wakes them on `signal`.
#[derive(Default)]
pub struct ChangeSignaler {
    observers: Mutex<Vec<Weak<ObserverInner>>>,
}

impl ChangeSignaler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, observer: &Observer) {
        self.observers.lock().push(observer.downgrade());
    }

    pub fn detach(&self, observer: &Observer) {
        let target = Arc::as_ptr(&observer.inner);
        self.observers.lock().retain(|weak| weak.as_ptr() != target);
    }

    /// Signals every still-live attached observer and drops dead weak
    /// references it encounters along the way.
    pub fn signal(&self, sequence: Sequence) {
        let mut observers = self.observers.lock();
        observers.retain(|weak| {
            if let Some(inner) = weak.upgrade() {
                Observer { inner }.signal(sequence);
                true
            } else {
                false
            }
        });
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_idempotence_keeps_the_lowest_sequence() {
        let observer = Observer::new();
        observer.signal(10);
        assert_eq!(observer.inner.state.lock().recorded_sequence, Some(10));
        observer.signal(15);
        assert_eq!(observer.inner.state.lock().recorded_sequence, Some(10));
        observer.signal(3);
        assert_eq!(observer.inner.state.lock().recorded_sequence, Some(3));
    }

    #[tokio::test]
    async fn wait_for_signal_returns_immediately_if_already_signalled() {
        let observer = Observer::new();
        observer.signal(7);
        let result = observer.wait_for_signal(Duration::from_secs(10)).await;
        assert_eq!(result, WaitResult::Signalled(7));
    }

    #[tokio::test]
    async fn wait_for_signal_times_out_without_a_signal() {
        let observer = Observer::new();
        let result = observer.wait_for_signal(Duration::from_millis(5)).await;
        assert_eq!(result, WaitResult::TimedOut);
    }

    #[tokio::test]
    async fn signaler_detach_stops_delivering_signals() {
        let signaler = ChangeSignaler::new();
        let observer = Observer::new();
        signaler.attach(&observer);
        assert_eq!(signaler.observer_count(), 1);

        signaler.detach(&observer);
        signaler.signal(1);
        assert_eq!(observer.wait_for_signal(Duration::from_millis(5)).await, WaitResult::TimedOut);
    }

    #[tokio::test]
    async fn destroyed_observer_is_pruned_on_next_signal() {
        let signaler = ChangeSignaler::new();
        {
            let observer = Observer::new();
            signaler.attach(&observer);
        }
        signaler.signal(1);
        assert_eq!(signaler.observer_count(), 0);
    }
}
