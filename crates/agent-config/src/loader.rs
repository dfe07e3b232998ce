use std::fmt::Write;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use serde_dynamic_string::DynamicString;
use toml::Value;

use crate::{AgentConfig, ConfigError};

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<AgentConfig> {
    let content = std::fs::read_to_string(path)?;
    let mut raw: Value = toml::from_str(&content)?;

    expand_dynamic_strings(&mut Vec::new(), &mut raw)?;

    let config = AgentConfig::deserialize(raw)?;
    validate(&config)?;

    Ok(config)
}

pub(crate) fn validate(config: &AgentConfig) -> anyhow::Result<()> {
    if !config.buffer.size.is_power_of_two() {
        return Err(ConfigError::BufferSizeNotPowerOfTwo(config.buffer.size).into());
    }
    if config.sources.is_empty() {
        return Err(ConfigError::NoSources.into());
    }
    Ok(())
}

/// Expands `{{ env.VAR }}`-style placeholders in every string value before
/// deserialization, mirroring how secrets and host names are supplied in
/// deployment environments.
fn expand_dynamic_strings<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => match DynamicString::<String>::from_str(s) {
            Ok(out) => *s = out.into_inner(),
            Err(err) => {
                let mut p = String::new();
                for segment in path.iter() {
                    match segment {
                        Ok(s) => {
                            p.push_str(s);
                            p.push('.');
                        }
                        Err(i) => write!(p, "[{i}]").unwrap(),
                    }
                }
                if p.ends_with('.') {
                    p.pop();
                }
                anyhow::bail!("failed to expand dynamic string at path '{p}': {err}");
            }
        },
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }
    Ok(())
}
