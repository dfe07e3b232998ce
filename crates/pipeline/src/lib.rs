//! The ingestion pipeline: tokenize → extract timestamp → map token →
//! duplicate → delta/period → unit convert → deliver.
//!
//! Each stage is its own small, independently testable unit (see the
//! per-module tests). [`Pipeline`] wires them into the single chain an
//! adapter session drives one line at a time.

pub mod contract;
pub mod duplicate_filter;
pub mod error;
pub mod filters;
pub mod timestamp;
pub mod token_mapper;
pub mod tokenizer;
pub mod unit_converter;

pub use contract::PipelineContract;
pub use duplicate_filter::DuplicateFilter;
pub use error::PipelineError;
pub use filters::{DeltaFilter, PeriodFilter, PeriodOutcome};
pub use timestamp::TimestampExtractor;
pub use token_mapper::{MappedItem, TokenMapper};

use std::sync::Arc;

use device_model::{DeviceCommand, DeviceModel, Filter, Observation, ObservationValue};
use jiff::Timestamp;

/// The `PipelineOptions` keys of §6.4 that affect this crate's own
/// behaviour, as opposed to `IgnoreTimestamps`/`RelativeTime` which are
/// consumed directly by [`TimestampExtractor`].
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub ignore_timestamps: bool,
    pub relative_time: bool,
    pub conversion_required: bool,
    pub upcase_value: bool,
    pub filter_duplicates: bool,
    pub auto_available: bool,
    pub preserve_uuid: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ignore_timestamps: false,
            relative_time: false,
            conversion_required: true,
            upcase_value: false,
            filter_duplicates: true,
            auto_available: true,
            preserve_uuid: false,
        }
    }
}

/// Per-adapter-session pipeline state. Not `Clone`: each session (TCP line
/// connector or agent-adapter stream) owns one instance.
pub struct Pipeline {
    timestamps: TimestampExtractor,
    tokens: TokenMapper,
    delta: DeltaFilter,
    period: PeriodFilter,
    contract: Arc<dyn PipelineContract>,
    options: SessionOptions,
}

impl Pipeline {
    pub fn new(contract: Arc<dyn PipelineContract>, ignore_timestamps: bool, relative_time: bool) -> Self {
        Self::with_options(
            contract,
            SessionOptions { ignore_timestamps, relative_time, ..SessionOptions::default() },
        )
    }

    pub fn with_options(contract: Arc<dyn PipelineContract>, options: SessionOptions) -> Self {
        Self {
            timestamps: TimestampExtractor::new(options.ignore_timestamps, options.relative_time),
            tokens: TokenMapper::new(),
            delta: DeltaFilter::new(),
            period: PeriodFilter::new(),
            contract,
            options,
        }
    }

    pub fn bind_device(&mut self, device: impl Into<String>) {
        self.tokens.bind_device(device);
    }

    /// Processes one already-tokenized SHDR data line (the `* PING`/`PONG`
    /// heartbeat handshake is handled by the connector, not here; other `*
    /// <name>: <value>` protocol commands arrive via [`Self::handle_command`]).
    ///
    /// When a `--multiline--<tag>` asset body is open, `raw_line` bypasses
    /// tokenization entirely and is accumulated verbatim (§4.3/§6.1).
    pub fn process_line(&mut self, model: &DeviceModel, raw_line: &str) {
        if self.tokens.is_accumulating_multiline() {
            if let Some(item) = self.tokens.accumulate_multiline(raw_line) {
                self.handle_mapped_item(model, item);
            }
            return;
        }

        let fields = tokenizer::tokenize(raw_line);
        let Some(ts_field) = fields.first() else { return };
        let (timestamp, _duration) = self.timestamps.extract(ts_field);

        for item in self.tokens.map_line(model, timestamp, &fields[1..]) {
            self.handle_mapped_item(model, item);
        }
    }

    /// Discards any partially accumulated multi-line asset body. Called on
    /// disconnect: terminator state is not carried across reconnects.
    pub fn discard_partial_multiline_asset(&mut self) {
        self.tokens.discard_multiline();
    }

    /// Forwards a device-metadata setter or behaviour flag (§4.10) to the
    /// host via [`PipelineContract::deliver_command`]; this pipeline has no
    /// state of its own that depends on them, except `PreserveUUID` (§6.4),
    /// which swallows an incoming `* uuid:` rather than forward it.
    pub fn handle_command(&self, command: DeviceCommand) {
        if self.options.preserve_uuid && matches!(command, DeviceCommand::Uuid(_)) {
            return;
        }
        self.contract.deliver_command(command);
    }

    /// Synthesizes the `AVAILABLE`/`UNAVAILABLE` Availability event §6.4's
    /// `AutoAvailable` calls for on transport connect/disconnect, when the
    /// adapter itself never sends one. A no-op when the option is off or the
    /// device has no Availability data item.
    pub fn set_connected(&mut self, model: &DeviceModel, connected: bool) {
        if !self.options.auto_available {
            return;
        }
        let Some(item) = find_availability_item(model) else { return };
        let obs = Observation {
            data_item_id: item.id.clone(),
            name: item.name.clone(),
            sub_type: None,
            statistic: None,
            composition_id: None,
            sequence: 0,
            timestamp: Timestamp::now(),
            unavailable: false,
            reset_triggered: None,
            value: ObservationValue::Event(if connected { "AVAILABLE".to_string() } else { "UNAVAILABLE".to_string() }),
        };
        self.handle_observation(model, obs);
    }

    fn handle_mapped_item(&mut self, model: &DeviceModel, item: MappedItem) {
        match item {
            MappedItem::AssetCommand(cmd) => self.contract.deliver_asset_command(cmd),
            MappedItem::Observation(obs) => self.handle_observation(model, obs),
        }
    }

    fn handle_observation(&mut self, model: &DeviceModel, obs: device_model::Observation) {
        let Some(item) = model.find_data_item(&obs.data_item_id) else {
            return;
        };

        let mut obs = if self.options.filter_duplicates {
            match self.contract.check_duplicate(obs) {
                Some(obs) => obs,
                None => return,
            }
        } else {
            obs
        };

        for filter in &item.filters {
            match filter {
                Filter::MinimumDelta(delta) => {
                    if !self.delta.should_pass(*delta, &obs) {
                        return;
                    }
                }
                Filter::Period(period) => match self.period.evaluate(*period, obs.clone()) {
                    PeriodOutcome::Emit(emitted) => obs = emitted,
                    PeriodOutcome::Scheduled { .. } | PeriodOutcome::Replaced => return,
                },
            }
        }

        let obs = self.convert_units(item, obs);
        let obs = self.apply_upcase(obs);
        self.contract.deliver_observation(obs);
    }

    /// Uppercases `Event`/`Message` string values when `UpcaseValue` (§6.4)
    /// is set. Samples, data sets and tables are left alone: the source only
    /// ever upcases free-text event/message values.
    fn apply_upcase(&self, mut obs: device_model::Observation) -> device_model::Observation {
        if !self.options.upcase_value {
            return obs;
        }
        match &mut obs.value {
            ObservationValue::Event(v) => *v = v.to_uppercase(),
            ObservationValue::Message { value, .. } => *value = value.to_uppercase(),
            _ => {}
        }
        obs
    }

    fn convert_units(&self, item: &device_model::DataItemDef, mut obs: device_model::Observation) -> device_model::Observation {
        if !self.options.conversion_required {
            return obs;
        }

        let Some(conversion) = item.converter(unit_converter::compute) else {
            return obs;
        };

        match &mut obs.value {
            ObservationValue::Sample(v) => *v = unit_converter::convert_scalar(&conversion, *v),
            ObservationValue::ThreeSpaceSample(v) => unit_converter::convert_vector(&conversion, v),
            ObservationValue::Timeseries { values, .. } => unit_converter::convert_vector(&conversion, values),
            _ => {}
        }

        obs
    }

    /// Called by the async driver when a period-filter timer armed via
    /// [`PeriodOutcome::Scheduled`] fires.
    pub fn fire_period_timer(&mut self, model: &DeviceModel, data_item_id: &str) {
        if let Some(obs) = self.period.fire(data_item_id) {
            if let Some(item) = model.find_data_item(data_item_id) {
                let obs = self.convert_units(item, obs);
                let obs = self.apply_upcase(obs);
                self.contract.deliver_observation(obs);
            }
        }
    }
}

fn find_availability_item<'a>(model: &'a DeviceModel) -> Option<&'a device_model::DataItemDef> {
    model.data_items().find(|item| item.r#type == "AVAILABILITY")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use device_model::{AssetCommand, AssetEvent, Category, DataItemDefInput, Device, Representation};

    use super::*;

    #[derive(Default)]
    struct MockContract {
        delivered: Mutex<Vec<Observation>>,
        commands: Mutex<Vec<DeviceCommand>>,
    }

    impl PipelineContract for MockContract {
        fn find_device<'a>(&'a self, model: &'a DeviceModel, uuid_or_name: &str) -> Option<&'a Device> {
            model.find_device(uuid_or_name)
        }

        fn deliver_observation(&self, obs: Observation) {
            self.delivered.lock().unwrap().push(obs);
        }

        fn deliver_asset_command(&self, _command: AssetCommand) {}

        fn deliver_asset_event(&self, _event: AssetEvent) {}

        fn deliver_command(&self, command: DeviceCommand) {
            self.commands.lock().unwrap().push(command);
        }

        fn deliver_connect_status(&self, _source_id: &str, _devices: &[String], _connected: bool) {}

        fn source_failed(&self, _source_id: &str) {}

        fn check_duplicate(&self, obs: Observation) -> Option<Observation> {
            Some(obs)
        }
    }

    fn model_with_availability() -> DeviceModel {
        let mut builder = DeviceModel::builder();
        let device = builder.add_device("machine1", Some("uuid-1".to_string()));
        let component = builder.add_component(device, None, "controller");
        builder
            .add_data_item(DataItemDefInput {
                id: "avail".to_string(),
                name: None,
                source: None,
                category: Category::Event,
                representation: Representation::Value,
                r#type: "AVAILABILITY".to_string(),
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
    fn auto_available_synthesizes_event_on_connect() {
        let model = model_with_availability();
        let contract = Arc::new(MockContract::default());
        let mut pipeline = Pipeline::with_options(contract.clone(), SessionOptions::default());

        pipeline.set_connected(&model, true);

        let delivered = contract.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].value, ObservationValue::Event("AVAILABLE".to_string()));
    }

    #[test]
    fn auto_available_disabled_emits_nothing() {
        let model = model_with_availability();
        let contract = Arc::new(MockContract::default());
        let mut pipeline = Pipeline::with_options(
            contract.clone(),
            SessionOptions { auto_available: false, ..SessionOptions::default() },
        );

        pipeline.set_connected(&model, true);

        assert!(contract.delivered.lock().unwrap().is_empty());
    }

    #[test]
    fn preserve_uuid_swallows_uuid_command() {
        let contract = Arc::new(MockContract::default());
        let pipeline = Pipeline::with_options(
            contract.clone(),
            SessionOptions { preserve_uuid: true, ..SessionOptions::default() },
        );

        pipeline.handle_command(DeviceCommand::Uuid("should-be-dropped".to_string()));
        pipeline.handle_command(DeviceCommand::Manufacturer("Acme".to_string()));

        let commands = contract.commands.lock().unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0], DeviceCommand::Manufacturer("Acme".to_string()));
    }
}
