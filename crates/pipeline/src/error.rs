use thiserror::Error;

/// Pipeline error taxonomy (§7): parse/validation failures that are logged
/// and either degrade a single observation to `UNAVAILABLE` or skip a
/// single token, never failing the whole line.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("unresolved data item key '{0}'")]
    UnknownDataItem(String),

    #[error("wrong field count for '{key}': expected {expected}, got {got}")]
    FieldCountMismatch { key: String, expected: usize, got: usize },

    #[error("could not convert value '{value}' for data item '{data_item_id}'")]
    ConversionFailure { data_item_id: String, value: String },

    #[error("unknown unit conversion: native '{native}' -> target '{target}'")]
    UnknownUnitConversion { native: String, target: String },
}
