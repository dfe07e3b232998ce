//! Suppresses successive identical values per data item (§4.4).

use std::collections::HashMap;

use device_model::Observation;

#[derive(Debug, Default)]
pub struct DuplicateFilter {
    last: HashMap<String, Observation>,
}

impl DuplicateFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the observation should pass (not a duplicate).
    /// `is_discrete` data items are always passed through, per §4.4.
    pub fn should_pass(&mut self, is_discrete: bool, obs: &Observation) -> bool {
        if is_discrete {
            return true;
        }
        match self.last.get(&obs.data_item_id) {
            Some(prior) if prior.value_equals(obs) => false,
            _ => {
                self.last.insert(obs.data_item_id.clone(), obs.clone());
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_model::ObservationValue;
    use jiff::Timestamp;

    fn event(id: &str, value: &str) -> Observation {
        Observation {
            data_item_id: id.to_string(),
            name: None,
            sub_type: None,
            statistic: None,
            composition_id: None,
            sequence: 0,
            timestamp: Timestamp::now(),
            unavailable: false,
            reset_triggered: None,
            value: ObservationValue::Event(value.to_string()),
        }
    }

    #[test]
    fn drops_repeated_value() {
        let mut filter = DuplicateFilter::new();
        assert!(filter.should_pass(false, &event("a", "READY")));
        assert!(!filter.should_pass(false, &event("a", "READY")));
        assert!(filter.should_pass(false, &event("a", "ACTIVE")));
    }

    #[test]
    fn discrete_items_always_pass() {
        let mut filter = DuplicateFilter::new();
        assert!(filter.should_pass(true, &event("a", "READY")));
        assert!(filter.should_pass(true, &event("a", "READY")));
    }
}
