//! A minimal, hand-built device model used when no device-model XML loader
//! is wired in. The XML loader itself is an out-of-scope external
//! collaborator; this stands in for it so the binary has something to
//! validate observations against.

use device_model::{Category, DataItemDefInput, DeviceModel, Filter, Representation};

pub fn build() -> DeviceModel {
    let mut builder = DeviceModel::builder();
    let device = builder.add_device("UnnamedDevice", None);
    let controller = builder.add_component(device, None, "Controller");

    let items = [
        ("avail", Category::Event, Representation::Value),
        ("estop", Category::Event, Representation::Discrete),
        ("execution", Category::Event, Representation::Value),
        ("system", Category::Condition, Representation::Value),
    ];

    for (id, category, representation) in items {
        builder
            .add_data_item(DataItemDefInput {
                id: id.to_string(),
                name: Some(id.to_string()),
                source: None,
                category,
                representation,
                r#type: "Generic".to_string(),
                sub_type: None,
                units: None,
                native_units: None,
                filters: Vec::<Filter>::new(),
                constraint: None,
                reset_trigger: None,
                initial_value: None,
                statistic: None,
                composition_id: None,
                component: controller,
                composition: None,
            })
            .expect("demo data items have unique ids");
    }

    builder.build()
}
