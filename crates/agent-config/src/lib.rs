//! Configuration structures mapping the agent's TOML configuration file
//! (§6.4).

mod error;
mod loader;

pub use error::ConfigError;

use std::path::Path;

use serde::Deserialize;

/// Top-level configuration: buffer sizing plus one entry per upstream
/// source (an SHDR line connector or another MTConnect agent).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub buffer: BufferConfig,
    pub sources: Vec<SourceConfig>,
}

impl AgentConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<AgentConfig> {
        loader::load(path)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }
}

/// `BufferSize` / `CheckpointFrequency`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferConfig {
    pub size: usize,
    pub checkpoint_frequency: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { size: 131_072, checkpoint_frequency: 1000 }
    }
}

/// Pipeline behaviour flags shared by every source kind: `IgnoreTimestamps`,
/// `RelativeTime`, `ConversionRequired`, `UpcaseValue`, `FilterDuplicates`,
/// `AutoAvailable`, `PreserveUUID`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineOptions {
    pub ignore_timestamps: bool,
    pub relative_time: bool,
    pub conversion_required: bool,
    pub upcase_value: bool,
    pub filter_duplicates: bool,
    pub auto_available: bool,
    pub preserve_uuid: bool,
}

impl Default for PipelineOptions {
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

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    Shdr(ShdrSourceConfig),
    Agent(AgentSourceConfig),
}

/// One `[[sources]]` entry with `kind = "shdr"`: a Line Connector session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShdrSourceConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub legacy_timeout_secs: u64,
    pub reconnect_interval_secs: u64,
    pub device: Option<String>,
    pub source_device: Option<String>,
    #[serde(flatten)]
    pub pipeline: PipelineOptions,
}

impl Default for ShdrSourceConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            host: String::new(),
            port: 7878,
            legacy_timeout_secs: 600,
            reconnect_interval_secs: 10,
            device: None,
            source_device: None,
            pipeline: PipelineOptions::default(),
        }
    }
}

/// One `[[sources]]` entry with `kind = "agent"`: an upstream MTConnect
/// agent polled over HTTP.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentSourceConfig {
    pub id: String,
    pub base_url: String,
    pub device: Option<String>,
    pub source_device: Option<String>,
    pub count: u32,
    pub heartbeat_ms: u64,
    pub interval_ms: u64,
    pub reconnect_interval_secs: u64,
    #[serde(flatten)]
    pub pipeline: PipelineOptions,
}

impl Default for AgentSourceConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            base_url: String::new(),
            device: None,
            source_device: None,
            count: 1000,
            heartbeat_ms: 10_000,
            interval_ms: 500,
            reconnect_interval_secs: 10,
            pipeline: PipelineOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_shdr_source() {
        let toml = r#"
            [buffer]
            size = 65536

            [[sources]]
            kind = "shdr"
            id = "mill-1"
            host = "192.168.1.10"
            port = 7878
        "#;
        let config: AgentConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.buffer.size, 65536);
        assert_eq!(config.sources.len(), 1);
        match &config.sources[0] {
            SourceConfig::Shdr(shdr) => {
                assert_eq!(shdr.id, "mill-1");
                assert_eq!(shdr.port, 7878);
                assert!(shdr.pipeline.filter_duplicates);
            }
            _ => panic!("expected an shdr source"),
        }
    }

    #[test]
    fn rejects_non_power_of_two_buffer_size() {
        let config = AgentConfig { buffer: BufferConfig { size: 1000, checkpoint_frequency: 10 }, sources: vec![] };
        assert!(loader::validate(&config).is_err());
    }

    #[test]
    fn rejects_empty_sources() {
        let config = AgentConfig::default();
        assert!(config.buffer.size.is_power_of_two());
        assert!(loader::validate(&config).is_err());
    }

    #[test]
    fn agent_source_defaults() {
        let toml = indoc::indoc! {r#"
            [buffer]
            size = 4096

            [[sources]]
            kind = "agent"
            id = "upstream"
            base_url = "http://192.168.1.20:5000"
        "#};
        let config: AgentConfig = toml::from_str(toml).unwrap();
        match &config.sources[0] {
            SourceConfig::Agent(agent) => insta::assert_debug_snapshot!(agent),
            _ => panic!("expected an agent source"),
        }
    }
}
