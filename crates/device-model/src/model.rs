//! Device-model arena.
//!
//! The source agent represents devices, components, compositions and data
//! items as a graph of shared pointers with manual back-references. Rust has
//! no idiomatic equivalent for that ownership shape, so the graph is
//! flattened into an arena: every node lives in a `Vec` and is addressed by a
//! small stable integer id. Cross-references (a data item's owning
//! component, a component's parent) become id lookups instead of pointers.
//! The arena is built once by the device-model loader (out of scope for this
//! core) and is immutable for the remainder of the process.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::ModelError;

macro_rules! node_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
    };
}

node_id!(DeviceId);
node_id!(ComponentId);
node_id!(CompositionId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataItemIndex(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Sample,
    Event,
    Condition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Representation {
    Value,
    TimeSeries,
    Discrete,
    DataSet,
    Table,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Filter {
    Period(f64),
    MinimumDelta(f64),
}

/// A precomputed `factor, offset` pair: `target = native * factor + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConversion {
    pub factor: f64,
    pub offset: f64,
}

impl UnitConversion {
    pub const IDENTITY: Self = Self { factor: 1.0, offset: 0.0 };

    pub fn apply(&self, value: f64) -> f64 {
        value * self.factor + self.offset
    }
}

#[derive(Debug, Clone)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub uuid: Option<String>,
    pub components: Vec<ComponentId>,
}

#[derive(Debug, Clone)]
pub struct Component {
    pub id: ComponentId,
    pub device: DeviceId,
    pub parent: Option<ComponentId>,
    pub name: String,
    pub children: Vec<ComponentId>,
    pub compositions: Vec<CompositionId>,
}

#[derive(Debug, Clone)]
pub struct Composition {
    pub id: CompositionId,
    pub component: ComponentId,
    pub name: String,
}

/// A typed signal produced by a device component.
///
/// Category and representation are immutable for the lifetime of the
/// process once the item is registered in a [`DeviceModel`].
#[derive(Debug)]
pub struct DataItemDef {
    pub id: String,
    pub name: Option<String>,
    pub source: Option<String>,
    pub category: Category,
    pub representation: Representation,
    pub r#type: String,
    pub sub_type: Option<String>,
    pub units: Option<String>,
    pub native_units: Option<String>,
    pub filters: Vec<Filter>,
    pub constraint: Option<String>,
    pub reset_trigger: Option<String>,
    pub initial_value: Option<String>,
    pub statistic: Option<String>,
    pub composition_id: Option<String>,
    pub component: ComponentId,
    pub composition: Option<CompositionId>,
    converter: OnceLock<Option<UnitConversion>>,
}

impl DataItemDef {
    /// Returns the cached unit conversion, computing and caching it on first
    /// use via `compute`. `compute` is only invoked once per data item.
    pub fn converter(&self, compute: impl FnOnce(&str, &str) -> Option<UnitConversion>) -> Option<UnitConversion> {
        *self.converter.get_or_init(|| match (&self.native_units, &self.units) {
            (Some(native), Some(target)) if native != target => compute(native, target),
            _ => None,
        })
    }
}

/// Read-only, build-once catalogue of devices, components, compositions and
/// data items, with lookup indices by id/name/source.
#[derive(Debug, Default)]
pub struct DeviceModel {
    devices: Vec<Device>,
    components: Vec<Component>,
    compositions: Vec<Composition>,
    data_items: Vec<DataItemDef>,
    by_id: HashMap<String, DataItemIndex>,
    by_name: HashMap<String, DataItemIndex>,
    by_source: HashMap<String, DataItemIndex>,
}

#[derive(Default)]
pub struct DeviceModelBuilder {
    model: DeviceModel,
}

impl DeviceModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&mut self, name: impl Into<String>, uuid: Option<String>) -> DeviceId {
        let id = DeviceId(self.model.devices.len() as u32);
        self.model.devices.push(Device { id, name: name.into(), uuid, components: Vec::new() });
        id
    }

    pub fn add_component(&mut self, device: DeviceId, parent: Option<ComponentId>, name: impl Into<String>) -> ComponentId {
        let id = ComponentId(self.model.components.len() as u32);
        self.model.components.push(Component {
            id,
            device,
            parent,
            name: name.into(),
            children: Vec::new(),
            compositions: Vec::new(),
        });
        if let Some(parent) = parent {
            self.model.components[parent.0 as usize].children.push(id);
        } else {
            self.model.devices[device.0 as usize].components.push(id);
        }
        id
    }

    pub fn add_composition(&mut self, component: ComponentId, name: impl Into<String>) -> CompositionId {
        let id = CompositionId(self.model.compositions.len() as u32);
        self.model.compositions.push(Composition { id, component, name: name.into() });
        self.model.components[component.0 as usize].compositions.push(id);
        id
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_data_item(&mut self, def: DataItemDefInput) -> Result<(), ModelError> {
        if self.model.by_id.contains_key(&def.id) {
            return Err(ModelError::DuplicateDataItem(def.id));
        }
        if def.component.0 as usize >= self.model.components.len() {
            return Err(ModelError::UnknownComponent(def.id, def.component));
        }

        let index = DataItemIndex(self.model.data_items.len() as u32);
        self.model.by_id.insert(def.id.clone(), index);
        if let Some(name) = &def.name {
            self.model.by_name.insert(name.clone(), index);
        }
        if let Some(source) = &def.source {
            self.model.by_source.insert(source.clone(), index);
        }

        self.model.data_items.push(DataItemDef {
            id: def.id,
            name: def.name,
            source: def.source,
            category: def.category,
            representation: def.representation,
            r#type: def.r#type,
            sub_type: def.sub_type,
            units: def.units,
            native_units: def.native_units,
            filters: def.filters,
            constraint: def.constraint,
            reset_trigger: def.reset_trigger,
            initial_value: def.initial_value,
            statistic: def.statistic,
            composition_id: def.composition_id,
            component: def.component,
            composition: def.composition,
            converter: OnceLock::new(),
        });

        Ok(())
    }

    pub fn build(self) -> DeviceModel {
        self.model
    }
}

/// Plain-data input to [`DeviceModelBuilder::add_data_item`]; kept separate
/// from [`DataItemDef`] because the latter holds a non-`Clone` conversion
/// cache.
pub struct DataItemDefInput {
    pub id: String,
    pub name: Option<String>,
    pub source: Option<String>,
    pub category: Category,
    pub representation: Representation,
    pub r#type: String,
    pub sub_type: Option<String>,
    pub units: Option<String>,
    pub native_units: Option<String>,
    pub filters: Vec<Filter>,
    pub constraint: Option<String>,
    pub reset_trigger: Option<String>,
    pub initial_value: Option<String>,
    pub statistic: Option<String>,
    pub composition_id: Option<String>,
    pub component: ComponentId,
    pub composition: Option<CompositionId>,
}

impl DeviceModel {
    pub fn builder() -> DeviceModelBuilder {
        DeviceModelBuilder::new()
    }

    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id.0 as usize)
    }

    pub fn find_device(&self, uuid_or_name: &str) -> Option<&Device> {
        self.devices
            .iter()
            .find(|d| d.uuid.as_deref() == Some(uuid_or_name) || d.name == uuid_or_name)
    }

    pub fn component(&self, id: ComponentId) -> Option<&Component> {
        self.components.get(id.0 as usize)
    }

    pub fn composition(&self, id: CompositionId) -> Option<&Composition> {
        self.compositions.get(id.0 as usize)
    }

    /// Resolves a data-item key in id, name, source order, as the token
    /// mapper requires.
    pub fn find_data_item(&self, key: &str) -> Option<&DataItemDef> {
        self.by_id
            .get(key)
            .or_else(|| self.by_name.get(key))
            .or_else(|| self.by_source.get(key))
            .map(|idx| &self.data_items[idx.0 as usize])
    }

    pub fn data_items(&self) -> impl Iterator<Item = &DataItemDef> {
        self.data_items.iter()
    }

    pub fn each_data_item(&self, mut f: impl FnMut(&DataItemDef)) {
        for item in &self.data_items {
            f(item);
        }
    }
}
