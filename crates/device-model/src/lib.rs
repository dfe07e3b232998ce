//! Typed device-model catalogue and observation value types.
//!
//! This crate is a pure data layer: it holds the arena of devices,
//! components, compositions and data items built by the (out of scope)
//! device-model loader, plus the observation value types the ingestion
//! pipeline produces. Nothing here performs I/O or owns a runtime.

pub mod asset;
pub mod command;
pub mod error;
pub mod model;
pub mod observation;

pub use asset::{AssetCommand, AssetEvent};
pub use command::DeviceCommand;
pub use error::ModelError;
pub use model::{
    Category, Component, ComponentId, Composition, CompositionId, DataItemDef, DataItemDefInput, DataItemIndex,
    Device, DeviceId, DeviceModel, DeviceModelBuilder, Filter, Representation, UnitConversion,
};
pub use observation::{
    ConditionActivations, ConditionLevel, ConditionObservation, DataSetEntry, Observation, ObservationValue,
    ScalarValue, Sequence, TableEntry,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model() -> DeviceModel {
        let mut builder = DeviceModel::builder();
        let device = builder.add_device("machine1", Some("uuid-1".to_string()));
        let component = builder.add_component(device, None, "controller");
        builder
            .add_data_item(DataItemDefInput {
                id: "a".to_string(),
                name: Some("exec".to_string()),
                source: None,
                category: Category::Event,
                representation: Representation::Value,
                r#type: "EXECUTION".to_string(),
                sub_type: None,
                units: None,
                native_units: None,
                filters: Vec::new(),
                constraint: None,
                reset_trigger: None,
                initial_value: None,
                statistic: None,
                composition_id: None,
                component,
                composition: None,
            })
            .unwrap();
        builder.build()
    }

    #[test]
    fn resolves_by_id_name_and_source() {
        let model = sample_model();
        assert_eq!(model.find_data_item("a").unwrap().id, "a");
        assert_eq!(model.find_data_item("exec").unwrap().id, "a");
        assert!(model.find_data_item("missing").is_none());
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut builder = DeviceModel::builder();
        let device = builder.add_device("m", None);
        let component = builder.add_component(device, None, "c");
        let input = DataItemDefInput {
            id: "a".to_string(),
            name: None,
            source: None,
            category: Category::Sample,
            representation: Representation::Value,
            r#type: "X".to_string(),
            sub_type: None,
            units: None,
            native_units: None,
            filters: Vec::new(),
            constraint: None,
            reset_trigger: None,
            initial_value: None,
            statistic: None,
            composition_id: None,
            component,
            composition: None,
        };
        builder.add_data_item(input).unwrap();
        let dup = DataItemDefInput {
            id: "a".to_string(),
            name: None,
            source: None,
            category: Category::Sample,
            representation: Representation::Value,
            r#type: "X".to_string(),
            sub_type: None,
            units: None,
            native_units: None,
            filters: Vec::new(),
            constraint: None,
            reset_trigger: None,
            initial_value: None,
            statistic: None,
            composition_id: None,
            component,
            composition: None,
        };
        assert!(builder.add_data_item(dup).is_err());
    }

    #[test]
    fn condition_activation_set_semantics() {
        let mut set = ConditionActivations::new();
        set.apply(&ConditionObservation {
            level: ConditionLevel::Fault,
            native_code: Some("E001".to_string()),
            native_severity: None,
            qualifier: None,
            message: Some("overheat".to_string()),
        });
        assert!(!set.is_empty());

        set.apply(&ConditionObservation {
            level: ConditionLevel::Normal,
            native_code: Some("E001".to_string()),
            native_severity: None,
            qualifier: None,
            message: None,
        });
        assert!(set.is_empty());
    }

    #[test]
    fn condition_equality_ignores_message() {
        let a = Observation {
            data_item_id: "c".to_string(),
            name: None,
            sub_type: None,
            statistic: None,
            composition_id: None,
            sequence: 1,
            timestamp: jiff::Timestamp::now(),
            unavailable: false,
            reset_triggered: None,
            value: ObservationValue::Condition(ConditionObservation {
                level: ConditionLevel::Fault,
                native_code: Some("E1".to_string()),
                native_severity: None,
                qualifier: None,
                message: Some("first".to_string()),
            }),
        };
        let mut b = a.clone();
        if let ObservationValue::Condition(c) = &mut b.value {
            c.message = Some("second".to_string());
        }
        assert!(a.value_equals(&b));
    }
}
