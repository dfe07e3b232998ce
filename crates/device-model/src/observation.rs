//! Observation values and the condition activation set.
//!
//! Variants are expressed as one tagged sum with an exhaustive match at
//! every serialisation/filter site, rather than the source's class
//! hierarchy with shared ownership and runtime casts.

use std::collections::HashMap;

use jiff::Timestamp;

/// A sequence number assigned by the circular buffer on publish. Strictly
/// increasing within a buffer's lifetime.
pub type Sequence = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionLevel {
    Normal,
    Warning,
    Fault,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionObservation {
    pub level: ConditionLevel,
    pub native_code: Option<String>,
    pub native_severity: Option<String>,
    pub qualifier: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Integer(i64),
    Double(f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataSetEntry {
    pub key: String,
    pub value: ScalarValue,
    pub removed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableEntry {
    pub key: String,
    pub cells: Vec<DataSetEntry>,
    pub removed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObservationValue {
    Sample(f64),
    ThreeSpaceSample([f64; 3]),
    Timeseries { values: Vec<f64>, sample_rate: f64, sample_count: u32 },
    Event(String),
    Message { native_code: Option<String>, value: String },
    DataSetEvent(Vec<DataSetEntry>),
    TableEvent(Vec<TableEntry>),
    Condition(ConditionObservation),
}

/// A timestamped value bound to one data item.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub data_item_id: String,
    pub name: Option<String>,
    pub sub_type: Option<String>,
    pub statistic: Option<String>,
    pub composition_id: Option<String>,
    pub sequence: Sequence,
    pub timestamp: Timestamp,
    pub unavailable: bool,
    /// Reset-trigger suffix (`:MANUAL`, `:DAY`, ...) stripped from a sample
    /// value before numeric parsing; carried separately so duplicate/delta
    /// filters compare on the numeric value alone.
    pub reset_triggered: Option<String>,
    pub value: ObservationValue,
}

impl Observation {
    /// Compares two observations for the duplicate filter (§4.4). Condition
    /// observations compare by `(level, nativeCode)` only, ignoring message
    /// text, matching the source's `ConditionEqual`.
    pub fn value_equals(&self, other: &Observation) -> bool {
        if self.unavailable != other.unavailable {
            return false;
        }
        match (&self.value, &other.value) {
            (ObservationValue::Condition(a), ObservationValue::Condition(b)) => {
                a.level == b.level && a.native_code == b.native_code
            }
            (a, b) => a == b,
        }
    }
}

/// Per-condition-data-item set of currently-active fault/warning
/// activations, keyed by native code (an absent code uses the empty
/// string as its key).
#[derive(Debug, Clone, Default)]
pub struct ConditionActivations {
    active: HashMap<String, ConditionObservation>,
}

impl ConditionActivations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies an incoming condition observation's activation semantics.
    ///
    /// A NORMAL without a native code clears the whole set; a NORMAL with a
    /// native code clears only the matching activation; anything else
    /// inserts/updates the activation keyed by its native code.
    pub fn apply(&mut self, obs: &ConditionObservation) {
        match obs.level {
            ConditionLevel::Normal => match &obs.native_code {
                Some(code) => {
                    self.active.remove(code);
                }
                None => self.active.clear(),
            },
            ConditionLevel::Warning | ConditionLevel::Fault | ConditionLevel::Unavailable => {
                let key = obs.native_code.clone().unwrap_or_default();
                self.active.insert(key, obs.clone());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn activations(&self) -> impl Iterator<Item = &ConditionObservation> {
        self.active.values()
    }
}
