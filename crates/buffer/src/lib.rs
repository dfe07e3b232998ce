//! Sequence-numbered ring of retained observations with periodic
//! checkpoints and a latest-per-data-item view (§4.7).
//!
//! Thread-safety: a single recursive mutex guards append, reconstruct and
//! retrieval, matching the source's design — readers hold it for the
//! duration of a scan so the sequence-number/observation link never tears.
//! `parking_lot::ReentrantMutex` only grants shared (`&T`) access on lock,
//! so the guarded state lives behind a `RefCell` for interior mutability.

pub mod error;

pub use error::BufferError;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};

use device_model::{ConditionActivations, ConditionLevel, DataSetEntry, Observation, ObservationValue, Sequence, TableEntry};
use parking_lot::ReentrantMutex;

#[derive(Debug, Clone)]
pub enum LatestEntry {
    Value(Observation),
    Condition(ConditionActivations),
}

/// A latest-per-data-item snapshot, either the always-current "latest"
/// checkpoint or a periodic one captured at a specific sequence.
pub type LatestView = HashMap<String, LatestEntry>;

/// The result of a sample (range) retrieval.
#[derive(Debug, Clone)]
pub struct SampleRange {
    pub observations: Vec<Observation>,
    pub end_sequence: Sequence,
    pub end_of_buffer: bool,
}

struct Inner {
    capacity: usize,
    checkpoint_frequency: u64,
    ring: Vec<Option<Observation>>,
    first_sequence: Sequence,
    next_sequence: Sequence,
    latest: LatestView,
    checkpoints: BTreeMap<Sequence, LatestView>,
}

impl Inner {
    fn slot(&self, sequence: Sequence) -> usize {
        (sequence as usize) % self.capacity
    }

    fn apply_to_view(view: &mut LatestView, obs: &Observation) {
        match &obs.value {
            ObservationValue::Condition(cond) => {
                let entry = view
                    .entry(obs.data_item_id.clone())
                    .or_insert_with(|| LatestEntry::Condition(ConditionActivations::new()));
                match entry {
                    LatestEntry::Condition(set) => set.apply(cond),
                    LatestEntry::Value(_) => {
                        let mut set = ConditionActivations::new();
                        set.apply(cond);
                        *entry = LatestEntry::Condition(set);
                    }
                }
            }
            ObservationValue::DataSetEvent(incoming) => {
                let merged = match view.get(&obs.data_item_id) {
                    Some(LatestEntry::Value(Observation { value: ObservationValue::DataSetEvent(prev), .. })) => {
                        merge_data_set_entries(prev, incoming)
                    }
                    _ => incoming.clone(),
                };
                let mut merged_obs = obs.clone();
                merged_obs.value = ObservationValue::DataSetEvent(merged);
                view.insert(obs.data_item_id.clone(), LatestEntry::Value(merged_obs));
            }
            ObservationValue::TableEvent(incoming) => {
                let merged = match view.get(&obs.data_item_id) {
                    Some(LatestEntry::Value(Observation { value: ObservationValue::TableEvent(prev), .. })) => {
                        merge_table_entries(prev, incoming)
                    }
                    _ => incoming.clone(),
                };
                let mut merged_obs = obs.clone();
                merged_obs.value = ObservationValue::TableEvent(merged);
                view.insert(obs.data_item_id.clone(), LatestEntry::Value(merged_obs));
            }
            _ => {
                view.insert(obs.data_item_id.clone(), LatestEntry::Value(obs.clone()));
            }
        }
    }
}

/// Merges a data set's currently active entries with a newly arrived set,
/// keyed by entry key: an incoming entry with an empty (`removed`) value
/// deletes the key, anything else replaces it. Per §4.7/§8 Scenario 2 the
/// latest view always reflects the full active set, not just the entries
/// named in the most recent observation.
fn merge_data_set_entries(existing: &[DataSetEntry], incoming: &[DataSetEntry]) -> Vec<DataSetEntry> {
    let mut merged: BTreeMap<String, DataSetEntry> = existing.iter().cloned().map(|e| (e.key.clone(), e)).collect();
    for entry in incoming {
        if entry.removed {
            merged.remove(&entry.key);
        } else {
            merged.insert(entry.key.clone(), entry.clone());
        }
    }
    merged.into_values().collect()
}

/// Same merge rule as [`merge_data_set_entries`], one level up: a removed
/// row deletes the whole row, otherwise its cells are merged into the
/// existing row's cells (or used as-is for a new row).
fn merge_table_entries(existing: &[TableEntry], incoming: &[TableEntry]) -> Vec<TableEntry> {
    let mut merged: BTreeMap<String, TableEntry> = existing.iter().cloned().map(|e| (e.key.clone(), e)).collect();
    for row in incoming {
        if row.removed {
            merged.remove(&row.key);
        } else {
            let cells = match merged.get(&row.key) {
                Some(existing_row) => merge_data_set_entries(&existing_row.cells, &row.cells),
                None => row.cells.clone(),
            };
            merged.insert(row.key.clone(), TableEntry { key: row.key.clone(), cells, removed: false });
        }
    }
    merged.into_values().collect()
}

/// Bounded ring of `N` observations with periodic checkpoints and a
/// continuously up to date latest-per-data-item view.
pub struct CircularBuffer {
    inner: ReentrantMutex<RefCell<Inner>>,
}

impl CircularBuffer {
    pub fn new(capacity: usize, checkpoint_frequency: u64) -> Self {
        Self {
            inner: ReentrantMutex::new(RefCell::new(Inner {
                capacity,
                checkpoint_frequency,
                ring: vec![None; capacity],
                first_sequence: 0,
                next_sequence: 0,
                latest: HashMap::new(),
                checkpoints: BTreeMap::new(),
            })),
        }
    }

    /// Assigns the next sequence, writes the observation into the ring,
    /// updates the latest view and any crossed checkpoint boundary, and
    /// evicts the oldest slot once the ring is full. Returns the assigned
    /// sequence.
    pub fn append(&self, mut obs: Observation) -> Sequence {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();

        let sequence = inner.next_sequence;
        obs.sequence = sequence;

        Inner::apply_to_view(&mut inner.latest, &obs);

        let slot = inner.slot(sequence);
        let capacity = inner.capacity;
        let checkpoint_frequency = inner.checkpoint_frequency;
        let first_sequence = inner.first_sequence;
        inner.ring[slot] = Some(obs);
        inner.next_sequence += 1;

        if checkpoint_frequency > 0 && sequence % checkpoint_frequency == 0 {
            let snapshot = inner.latest.clone();
            inner.checkpoints.insert(sequence, snapshot);
        }

        if inner.next_sequence - first_sequence > capacity as u64 {
            inner.first_sequence += 1;
            let evicted = inner.first_sequence;
            inner.checkpoints.retain(|&seq, _| seq >= evicted);
        }

        sequence
    }

    pub fn first_sequence(&self) -> Sequence {
        self.inner.lock().borrow().first_sequence
    }

    pub fn next_sequence(&self) -> Sequence {
        self.inner.lock().borrow().next_sequence
    }

    /// Reconstructs the latest-per-data-item view as of `sequence`,
    /// restricted to `filter` (all data items if `None`).
    pub fn reconstruct_at(&self, sequence: Sequence, filter: Option<&HashSet<String>>) -> Result<LatestView, BufferError> {
        let guard = self.inner.lock();
        let inner = guard.borrow();

        if sequence < inner.first_sequence {
            return Err(BufferError::ClientFellTooFarBehind { requested: sequence, first_sequence: inner.first_sequence });
        }

        let (checkpoint_seq, mut view) = match inner.checkpoints.range(..=sequence).next_back() {
            Some((seq, snapshot)) => (*seq, snapshot.clone()),
            None => (inner.first_sequence, HashMap::new()),
        };

        for seq in (checkpoint_seq + 1)..=sequence {
            if seq >= inner.next_sequence {
                break;
            }
            if let Some(obs) = &inner.ring[inner.slot(seq)] {
                if obs.sequence == seq {
                    Inner::apply_to_view(&mut view, obs);
                }
            }
        }

        Ok(filter_view(view, filter))
    }

    /// Returns the always-current latest view, restricted to `filter`.
    pub fn latest(&self, filter: Option<&HashSet<String>>) -> LatestView {
        let guard = self.inner.lock();
        let inner = guard.borrow();
        filter_view(inner.latest.clone(), filter)
    }

    /// Returns up to `count` observations starting at `from`, capped at
    /// `to` if given, restricted to `filter`.
    pub fn sample(
        &self,
        from: Sequence,
        count: usize,
        to: Option<Sequence>,
        filter: Option<&HashSet<String>>,
    ) -> Result<SampleRange, BufferError> {
        let guard = self.inner.lock();
        let inner = guard.borrow();

        if from < inner.first_sequence {
            return Err(BufferError::ClientFellTooFarBehind { requested: from, first_sequence: inner.first_sequence });
        }

        let upper = to.map(|t| t.min(inner.next_sequence)).unwrap_or(inner.next_sequence);
        let mut observations = Vec::new();
        let mut seq = from;

        while seq < upper && observations.len() < count {
            if let Some(obs) = &inner.ring[inner.slot(seq)] {
                if obs.sequence == seq && passes_filter(&obs.data_item_id, filter) {
                    observations.push(obs.clone());
                }
            }
            seq += 1;
        }

        Ok(SampleRange { end_sequence: seq, end_of_buffer: seq >= inner.next_sequence, observations })
    }
}

fn passes_filter(data_item_id: &str, filter: Option<&HashSet<String>>) -> bool {
    filter.is_none_or(|f| f.contains(data_item_id))
}

fn filter_view(view: LatestView, filter: Option<&HashSet<String>>) -> LatestView {
    match filter {
        None => view,
        Some(f) => view.into_iter().filter(|(id, _)| f.contains(id)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jiff::Timestamp;

    fn event(id: &str, seq: Sequence, value: &str) -> Observation {
        Observation {
            data_item_id: id.to_string(),
            name: None,
            sub_type: None,
            statistic: None,
            composition_id: None,
            sequence: seq,
            timestamp: Timestamp::now(),
            unavailable: false,
            reset_triggered: None,
            value: ObservationValue::Event(value.to_string()),
        }
    }

    #[test]
    fn append_assigns_increasing_sequences() {
        let buffer = CircularBuffer::new(8, 4);
        assert_eq!(buffer.append(event("a", 0, "1")), 0);
        assert_eq!(buffer.append(event("a", 0, "2")), 1);
        assert_eq!(buffer.next_sequence(), 2);
    }

    #[test]
    fn evicts_oldest_when_full() {
        let buffer = CircularBuffer::new(4, 2);
        for i in 0..6 {
            buffer.append(event("a", 0, &i.to_string()));
        }
        assert_eq!(buffer.first_sequence(), 2);
        assert_eq!(buffer.next_sequence(), 6);
    }

    #[test]
    fn reconstruct_matches_latest_regardless_of_checkpoint_placement() {
        let buffer = CircularBuffer::new(16, 3);
        buffer.append(event("a", 0, "1"));
        buffer.append(event("b", 0, "x"));
        buffer.append(event("a", 0, "2"));
        buffer.append(event("a", 0, "3"));

        let at_3 = buffer.reconstruct_at(3, None).unwrap();
        let latest = buffer.latest(None);
        assert_eq!(at_3.len(), latest.len());
    }

    #[test]
    fn sample_reports_not_found_when_evicted() {
        let buffer = CircularBuffer::new(4, 2);
        for i in 0..10 {
            buffer.append(event("a", 0, &i.to_string()));
        }
        let err = buffer.sample(0, 5, None, None).unwrap_err();
        assert!(matches!(err, BufferError::ClientFellTooFarBehind { .. }));
    }

    #[test]
    fn condition_latest_view_returns_full_active_set() {
        let buffer = CircularBuffer::new(16, 4);
        let make = |level, code: &str| Observation {
            data_item_id: "cond".to_string(),
            name: None,
            sub_type: None,
            statistic: None,
            composition_id: None,
            sequence: 0,
            timestamp: Timestamp::now(),
            unavailable: false,
            reset_triggered: None,
            value: ObservationValue::Condition(device_model::ConditionObservation {
                level,
                native_code: Some(code.to_string()),
                native_severity: None,
                qualifier: None,
                message: None,
            }),
        };
        buffer.append(make(ConditionLevel::Fault, "E1"));
        buffer.append(make(ConditionLevel::Fault, "E2"));

        let latest = buffer.latest(None);
        match latest.get("cond") {
            Some(LatestEntry::Condition(set)) => assert_eq!(set.activations().count(), 2),
            _ => panic!("expected condition entry"),
        }
    }

    fn data_set_event(entries: Vec<device_model::DataSetEntry>) -> Observation {
        Observation {
            data_item_id: "v1".to_string(),
            name: None,
            sub_type: None,
            statistic: None,
            composition_id: None,
            sequence: 0,
            timestamp: Timestamp::now(),
            unavailable: false,
            reset_triggered: None,
            value: ObservationValue::DataSetEvent(entries),
        }
    }

    #[test]
    fn data_set_latest_view_merges_and_honours_removal() {
        use device_model::{DataSetEntry, ScalarValue};

        let buffer = CircularBuffer::new(16, 4);
        buffer.append(data_set_event(vec![
            DataSetEntry { key: "a".to_string(), value: ScalarValue::Integer(1), removed: false },
            DataSetEntry { key: "b".to_string(), value: ScalarValue::Integer(2), removed: false },
            DataSetEntry { key: "c".to_string(), value: ScalarValue::String("abc".to_string()), removed: false },
        ]));
        buffer.append(data_set_event(vec![DataSetEntry { key: "c".to_string(), value: ScalarValue::String(String::new()), removed: true }]));

        let latest = buffer.latest(None);
        match latest.get("v1") {
            Some(LatestEntry::Value(Observation { value: ObservationValue::DataSetEvent(entries), .. })) => {
                assert_eq!(entries.len(), 2);
                assert!(entries.iter().any(|e| e.key == "a" && e.value == ScalarValue::Integer(1)));
                assert!(entries.iter().any(|e| e.key == "b" && e.value == ScalarValue::Integer(2)));
                assert!(!entries.iter().any(|e| e.key == "c"));
            }
            _ => panic!("expected a data-set entry"),
        }
    }
}
