//! The concrete [`PipelineContract`]: owns the circular buffer, the change
//! signaler, and the per-data-item duplicate filter state that the
//! ingestion pipeline and the agent-adapter sessions both deliver into.

use std::sync::{Arc, Mutex};

use buffer::CircularBuffer;
use change_observer::ChangeSignaler;
use device_model::{AssetCommand, AssetEvent, Device, DeviceCommand, DeviceModel, Observation, Representation};
use pipeline::{DuplicateFilter, PipelineContract};

pub struct AgentContract {
    model: Arc<DeviceModel>,
    buffer: Arc<CircularBuffer>,
    signaler: Arc<ChangeSignaler>,
    duplicates: Mutex<DuplicateFilter>,
}

impl AgentContract {
    pub fn new(model: Arc<DeviceModel>, buffer: Arc<CircularBuffer>, signaler: Arc<ChangeSignaler>) -> Self {
        Self { model, buffer, signaler, duplicates: Mutex::new(DuplicateFilter::new()) }
    }

    pub fn buffer(&self) -> &Arc<CircularBuffer> {
        &self.buffer
    }

    pub fn signaler(&self) -> &Arc<ChangeSignaler> {
        &self.signaler
    }
}

impl PipelineContract for AgentContract {
    fn find_device<'a>(&'a self, model: &'a DeviceModel, uuid_or_name: &str) -> Option<&'a Device> {
        model.find_device(uuid_or_name)
    }

    fn deliver_observation(&self, obs: Observation) {
        let sequence = self.buffer.append(obs);
        self.signaler.signal(sequence);
    }

    fn deliver_asset_command(&self, command: AssetCommand) {
        log::info!("asset command received (asset store is a collaborator): {command:?}");
    }

    fn deliver_asset_event(&self, event: AssetEvent) {
        log::debug!("asset changed/removed upstream: {event:?}");
    }

    fn deliver_command(&self, command: DeviceCommand) {
        log::info!("device command received (device-model loader is a collaborator): {command:?}");
    }

    fn deliver_connect_status(&self, source_id: &str, devices: &[String], connected: bool) {
        log::info!("source `{source_id}` connected={connected} devices={devices:?}");
    }

    fn source_failed(&self, source_id: &str) {
        log::error!("source `{source_id}` failed and will not be retried");
    }

    fn check_duplicate(&self, obs: Observation) -> Option<Observation> {
        let is_discrete = self
            .model
            .find_data_item(&obs.data_item_id)
            .map(|item| item.representation == Representation::Discrete)
            .unwrap_or(false);

        let mut duplicates = self.duplicates.lock().expect("duplicate filter mutex poisoned");
        if duplicates.should_pass(is_discrete, &obs) { Some(obs) } else { None }
    }
}
