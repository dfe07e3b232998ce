//! The collaborator contract between the pipeline and the hosting core
//! (§6.3). Implemented by whatever owns the circular buffer, the device
//! model and the consumer-facing surfaces; this crate only calls it.

use device_model::{AssetCommand, AssetEvent, Device, DeviceCommand, DeviceModel, Observation};

/// Operations the pipeline invokes on its host as observations, assets and
/// commands are produced. None of these are implemented in this crate —
/// the circular buffer, asset store and connection-status tracking are all
/// supplied by the binary wiring the pieces together.
pub trait PipelineContract: Send + Sync {
    fn find_device<'a>(&'a self, model: &'a DeviceModel, uuid_or_name: &str) -> Option<&'a Device>;

    fn deliver_observation(&self, obs: Observation);

    fn deliver_asset_command(&self, command: AssetCommand);

    fn deliver_asset_event(&self, event: AssetEvent);

    /// A device-metadata setter or behaviour flag carried by a `* <name>:
    /// <value>` protocol command (§4.10).
    fn deliver_command(&self, command: DeviceCommand);

    fn deliver_connect_status(&self, source_id: &str, devices: &[String], connected: bool);

    fn source_failed(&self, source_id: &str);

    /// Checks (and records) whether `obs` is a duplicate of the last
    /// delivered value for its data item, returning `None` if so. The
    /// contract owns the retained-value state so that duplicate
    /// suppression survives across pipeline stage instances.
    fn check_duplicate(&self, obs: Observation) -> Option<Observation>;
}
