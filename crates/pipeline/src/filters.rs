//! Minimum-delta and period filters (§4.5).

use std::collections::HashMap;
use std::time::Duration;

use device_model::{Observation, ObservationValue};

#[derive(Debug, Clone, Copy)]
enum DeltaState {
    Scalar(f64),
    Vector([f64; 3]),
}

/// Drops numeric samples that haven't moved at least `ν` since the last
/// emitted value. Resets to `UNAVAILABLE` always pass and clear the
/// baseline.
#[derive(Debug, Default)]
pub struct DeltaFilter {
    last: HashMap<String, DeltaState>,
}

impl DeltaFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_pass(&mut self, delta: f64, obs: &Observation) -> bool {
        if obs.unavailable {
            self.last.remove(&obs.data_item_id);
            return true;
        }

        match &obs.value {
            ObservationValue::Sample(v) => match self.last.get(&obs.data_item_id) {
                Some(DeltaState::Scalar(last)) if (v - last).abs() < delta => false,
                _ => {
                    self.last.insert(obs.data_item_id.clone(), DeltaState::Scalar(*v));
                    true
                }
            },
            ObservationValue::ThreeSpaceSample(v) => match self.last.get(&obs.data_item_id) {
                Some(DeltaState::Vector(last)) if euclidean(v, last) < delta => false,
                _ => {
                    self.last.insert(obs.data_item_id.clone(), DeltaState::Vector(*v));
                    true
                }
            },
            _ => true,
        }
    }
}

fn euclidean(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

#[derive(Debug)]
pub enum PeriodOutcome {
    /// Emit `obs` now.
    Emit(Observation),
    /// No prior timer was running for this data item; the caller must arm
    /// one for `delay` and call [`PeriodFilter::fire`] on expiry.
    Scheduled { delay: Duration },
    /// A timer is already running for this data item; `obs` replaced the
    /// pending value and nothing further is required of the caller.
    Replaced,
}

#[derive(Debug, Default)]
struct Window {
    last_emit_micros: Option<i64>,
    pending: Option<Observation>,
    timer_armed: bool,
}

/// Emits at most one observation per data item per rolling `τ` window,
/// delaying and coalescing arrivals that land inside the window.
#[derive(Debug, Default)]
pub struct PeriodFilter {
    windows: HashMap<String, Window>,
}

impl PeriodFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn evaluate(&mut self, period_secs: f64, obs: Observation) -> PeriodOutcome {
        let window = self.windows.entry(obs.data_item_id.clone()).or_default();
        let now_micros = obs.timestamp.as_microsecond();

        if obs.unavailable {
            window.pending = None;
            window.timer_armed = false;
            window.last_emit_micros = Some(now_micros);
            return PeriodOutcome::Emit(obs);
        }

        let period_micros = (period_secs * 1_000_000.0).round() as i64;

        let Some(last) = window.last_emit_micros else {
            window.last_emit_micros = Some(now_micros);
            return PeriodOutcome::Emit(obs);
        };

        let elapsed = now_micros - last;

        if elapsed < 0 || elapsed >= period_micros {
            window.last_emit_micros = Some(now_micros);
            window.pending = None;
            window.timer_armed = false;
            return PeriodOutcome::Emit(obs);
        }

        window.pending = Some(obs);
        if window.timer_armed {
            PeriodOutcome::Replaced
        } else {
            window.timer_armed = true;
            PeriodOutcome::Scheduled { delay: Duration::from_micros((period_micros - elapsed) as u64) }
        }
    }

    /// Called when a timer armed by [`Self::evaluate`] expires. Returns the
    /// latest pending observation for that data item, if any is still
    /// outstanding (it may have already been superseded by an immediate
    /// emit).
    pub fn fire(&mut self, data_item_id: &str) -> Option<Observation> {
        let window = self.windows.get_mut(data_item_id)?;
        window.timer_armed = false;
        let pending = window.pending.take()?;
        window.last_emit_micros = Some(pending.timestamp.as_microsecond());
        Some(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::{Span, Timestamp};

    fn sample(id: &str, value: f64, offset_ms: i64) -> Observation {
        Observation {
            data_item_id: id.to_string(),
            name: None,
            sub_type: None,
            statistic: None,
            composition_id: None,
            sequence: 0,
            timestamp: Timestamp::now().checked_add(Span::new().milliseconds(offset_ms)).unwrap(),
            unavailable: false,
            reset_triggered: None,
            value: ObservationValue::Sample(value),
        }
    }

    #[test]
    fn delta_filter_drops_small_moves() {
        let mut filter = DeltaFilter::new();
        assert!(filter.should_pass(1.0, &sample("x", 0.0, 0)));
        assert!(!filter.should_pass(1.0, &sample("x", 0.5, 1)));
        assert!(filter.should_pass(1.0, &sample("x", 2.0, 2)));
    }

    #[test]
    fn period_filter_coalesces_arrivals_in_window() {
        let mut filter = PeriodFilter::new();
        let base = Timestamp::now();
        let at = |ms: i64| base.checked_add(Span::new().milliseconds(ms)).unwrap();
        let obs_at = |value: f64, ms: i64| Observation {
            data_item_id: "x".to_string(),
            name: None,
            sub_type: None,
            statistic: None,
            composition_id: None,
            sequence: 0,
            timestamp: at(ms),
            unavailable: false,
            reset_triggered: None,
            value: ObservationValue::Sample(value),
        };

        assert!(matches!(filter.evaluate(1.0, obs_at(1.0, 0)), PeriodOutcome::Emit(_)));
        assert!(matches!(filter.evaluate(1.0, obs_at(2.0, 200)), PeriodOutcome::Scheduled { .. }));
        assert!(matches!(filter.evaluate(1.0, obs_at(3.0, 500)), PeriodOutcome::Replaced));
        assert!(matches!(filter.evaluate(1.0, obs_at(4.0, 1100)), PeriodOutcome::Emit(_)));
        assert!(filter.fire("x").is_none());
    }
}
