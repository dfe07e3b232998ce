use std::sync::Arc;

use agent_config::AgentConfig;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use args::Args;
use contract::AgentContract;

mod args;
mod contract;
mod demo_model;
mod sources;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    agent_telemetry::init(&args.log_filter);

    let config = AgentConfig::load(&args.config)?;
    config.validate()?;

    let model = Arc::new(demo_model::build());
    let buffer = Arc::new(buffer::CircularBuffer::new(config.buffer.size, config.buffer.checkpoint_frequency as u64));
    let signaler = Arc::new(change_observer::ChangeSignaler::new());
    let contract = Arc::new(AgentContract::new(model.clone(), buffer.clone(), signaler.clone()));

    let cancel = CancellationToken::new();
    let handles = sources::spawn_all(&config.sources, model, contract, cancel.clone());

    log::info!("agent started with {} source(s)", handles.len());

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");
    cancel.cancel();

    for handle in handles {
        let _ = handle.await;
    }

    Ok(())
}
