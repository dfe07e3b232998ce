use thiserror::Error;

/// Errors raised while building or querying a [`crate::model::DeviceModel`].
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("duplicate data item id '{0}'")]
    DuplicateDataItem(String),

    #[error("data item '{0}' references unknown component {1:?}")]
    UnknownComponent(String, crate::model::ComponentId),

    #[error("unknown unit pair: native '{native}', target '{target}'")]
    UnknownUnitConversion { native: String, target: String },
}
