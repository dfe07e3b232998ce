use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "agent", about = "MTConnect agent core: ingestion, retention and change notification")]
pub struct Args {
    /// Path to the agent's TOML configuration file.
    #[arg(long, short = 'c', env = "AGENT_CONFIG")]
    pub config: PathBuf,

    /// Log filter, e.g. "info" or "connector=debug,agent_adapter=debug".
    #[arg(long, env = "AGENT_LOG", default_value = "info")]
    pub log_filter: String,
}
