//! Spawns one connector/pipeline pair per configured SHDR source and one
//! agent-adapter session per configured upstream-agent source, all
//! delivering into the same [`AgentContract`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_adapter::{AdapterConfig, AgentAdapter};
use agent_config::{AgentSourceConfig, ShdrSourceConfig, SourceConfig};
use connector::{ConnectorConfig, LineConnector, LineSink, ProtocolCommand};
use device_model::{DeviceCommand, DeviceModel};
use pipeline::{Pipeline, PipelineContract, SessionOptions};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::contract::AgentContract;

pub fn spawn_all(
    sources: &[SourceConfig],
    model: Arc<DeviceModel>,
    contract: Arc<AgentContract>,
    cancel: CancellationToken,
) -> Vec<JoinHandle<()>> {
    sources
        .iter()
        .map(|source| match source {
            SourceConfig::Shdr(shdr) => spawn_shdr(shdr.clone(), model.clone(), contract.clone(), cancel.clone()),
            SourceConfig::Agent(agent) => spawn_agent(agent.clone(), model.clone(), contract.clone(), cancel.clone()),
        })
        .collect()
}

struct PipelineSink {
    model: Arc<DeviceModel>,
    pipeline: Mutex<Pipeline>,
}

impl LineSink for PipelineSink {
    fn on_data_line(&self, line: &str) {
        let mut pipeline = self.pipeline.lock().expect("pipeline mutex poisoned");
        pipeline.process_line(&self.model, line);
    }

    fn on_command(&self, command: ProtocolCommand) {
        let mut pipeline = self.pipeline.lock().expect("pipeline mutex poisoned");
        match command {
            ProtocolCommand::Device(device) => pipeline.bind_device(device),
            ProtocolCommand::Uuid(v) => pipeline.handle_command(DeviceCommand::Uuid(v)),
            ProtocolCommand::Manufacturer(v) => pipeline.handle_command(DeviceCommand::Manufacturer(v)),
            ProtocolCommand::SerialNumber(v) => pipeline.handle_command(DeviceCommand::SerialNumber(v)),
            ProtocolCommand::Station(v) => pipeline.handle_command(DeviceCommand::Station(v)),
            ProtocolCommand::Description(v) => pipeline.handle_command(DeviceCommand::Description(v)),
            ProtocolCommand::NativeName(v) => pipeline.handle_command(DeviceCommand::NativeName(v)),
            ProtocolCommand::Calibration(v) => pipeline.handle_command(DeviceCommand::Calibration(v)),
            ProtocolCommand::ConversionRequired => pipeline.handle_command(DeviceCommand::ConversionRequired),
            ProtocolCommand::RelativeTime => pipeline.handle_command(DeviceCommand::RelativeTime),
            ProtocolCommand::RealTime => pipeline.handle_command(DeviceCommand::RealTime),
            ProtocolCommand::Pong { .. } | ProtocolCommand::Ping | ProtocolCommand::Unknown(_) => {}
        }
    }

    fn on_connect_status(&self, connected: bool) {
        log::debug!("shdr transport connected={connected}");
        let mut pipeline = self.pipeline.lock().expect("pipeline mutex poisoned");
        if !connected {
            pipeline.discard_partial_multiline_asset();
        }
        pipeline.set_connected(&self.model, connected);
    }
}

fn spawn_shdr(
    config: ShdrSourceConfig,
    model: Arc<DeviceModel>,
    contract: Arc<AgentContract>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let dyn_contract: Arc<dyn PipelineContract> = contract;
        let mut pipeline = Pipeline::with_options(
            dyn_contract,
            SessionOptions {
                ignore_timestamps: config.pipeline.ignore_timestamps,
                relative_time: config.pipeline.relative_time,
                conversion_required: config.pipeline.conversion_required,
                upcase_value: config.pipeline.upcase_value,
                filter_duplicates: config.pipeline.filter_duplicates,
                auto_available: config.pipeline.auto_available,
                preserve_uuid: config.pipeline.preserve_uuid,
            },
        );
        if let Some(device) = &config.device {
            pipeline.bind_device(device.clone());
        }

        let sink = Arc::new(PipelineSink { model, pipeline: Mutex::new(pipeline) });

        let mut connector_config = ConnectorConfig::new(config.host, config.port);
        connector_config.reconnect_interval = Duration::from_secs(config.reconnect_interval_secs);
        connector_config.legacy_timeout = Duration::from_secs(config.legacy_timeout_secs);

        LineConnector::new(connector_config).run(sink, cancel).await;
    })
}

fn spawn_agent(
    config: AgentSourceConfig,
    model: Arc<DeviceModel>,
    contract: Arc<AgentContract>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let dyn_contract: Arc<dyn PipelineContract> = contract;
        let adapter_config = AdapterConfig {
            source_id: config.id,
            base_url: config.base_url,
            device: config.device,
            count: config.count,
            heartbeat_ms: config.heartbeat_ms,
            interval_ms: config.interval_ms,
            reconnect_interval: Duration::from_secs(config.reconnect_interval_secs),
        };

        let adapter = AgentAdapter::new(adapter_config, reqwest::Client::new());
        adapter.run(&model, dyn_contract, cancel).await;
    })
}
