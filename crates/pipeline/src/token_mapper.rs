//! Resolves a data-item key to a model entry and constructs a typed
//! observation with its required properties (§4.3).

use std::collections::HashSet;

use device_model::{
    AssetCommand, Category, ConditionLevel, ConditionObservation, DataItemDef, DataSetEntry, DeviceModel,
    Observation, ObservationValue, ScalarValue, TableEntry,
};
use jiff::Timestamp;
use log::{debug, warn};

use crate::error::PipelineError;

/// One line mapped to zero or more deliverables. A line maps to zero items
/// when its key cannot be resolved (logged once, not an error).
#[derive(Debug, Clone, PartialEq)]
pub enum MappedItem {
    Observation(Observation),
    AssetCommand(AssetCommand),
}

/// Splits a `[device:]key` token into its optional device and bare key.
fn split_key(token: &str) -> (Option<&str>, &str) {
    match token.split_once(':') {
        Some((device, key)) if !device.is_empty() && !key.is_empty() => (Some(device), key),
        _ => (None, token),
    }
}

/// An `@ASSET@`/`@UPDATE_ASSET@` line whose body opened with a
/// `--multiline--<tag>` terminator (§4.3/§6.1): raw lines accumulate here,
/// untokenized, until a line consisting of the same terminator closes it.
#[derive(Debug)]
struct MultilineAsset {
    tag: String,
    asset_id: String,
    asset_type: String,
    is_update: bool,
    device_uuid: Option<String>,
    lines: Vec<String>,
}

/// Per-session state: which device is currently bound (via `* device:`),
/// which unresolved keys have already been logged once, and any multi-line
/// asset body currently being accumulated.
#[derive(Debug, Default)]
pub struct TokenMapper {
    current_device: Option<String>,
    logged_once: HashSet<String>,
    multiline: Option<MultilineAsset>,
}

impl TokenMapper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind_device(&mut self, device: impl Into<String>) {
        self.current_device = Some(device.into());
    }

    /// Whether a `--multiline--<tag>` asset body is currently being
    /// accumulated; while true, incoming lines must bypass normal
    /// tokenization and go to [`Self::accumulate_multiline`] instead.
    pub fn is_accumulating_multiline(&self) -> bool {
        self.multiline.is_some()
    }

    /// Feeds one raw, untokenized line into the open multi-line asset body.
    /// Returns the completed asset command once a line consisting solely of
    /// the matching `--multiline--<tag>` terminator is seen.
    pub fn accumulate_multiline(&mut self, raw_line: &str) -> Option<MappedItem> {
        let open = self.multiline.as_ref()?;
        if raw_line.trim() != format!("--multiline--{}", open.tag) {
            self.multiline.as_mut().unwrap().lines.push(raw_line.to_string());
            return None;
        }

        let open = self.multiline.take().unwrap();
        let body = open.lines.join("\n");
        Some(MappedItem::AssetCommand(if open.is_update {
            AssetCommand::UpdateAsset { asset_id: open.asset_id, body }
        } else {
            AssetCommand::Asset {
                asset_id: open.asset_id,
                asset_type: open.asset_type,
                device_uuid: open.device_uuid,
                body,
            }
        }))
    }

    /// Discards a partially accumulated multi-line asset, e.g. on
    /// disconnect, where terminator semantics across reconnects are not
    /// carried forward.
    pub fn discard_multiline(&mut self) {
        self.multiline = None;
    }

    /// Maps one SHDR line (already tokenized, `fields[0]` is the key) into
    /// zero or more deliverables. Per §4.3, a conversion failure on one
    /// field yields an `UNAVAILABLE` observation rather than aborting the
    /// line.
    pub fn map_line(
        &mut self,
        model: &DeviceModel,
        timestamp: Timestamp,
        fields: &[String],
    ) -> Vec<MappedItem> {
        let Some(key_field) = fields.first() else {
            return Vec::new();
        };
        let (device, key) = split_key(key_field);
        let device = device.or(self.current_device.as_deref());
        let values = &fields[1..];

        if let Some(stripped) = key.strip_prefix('@') {
            return self.map_asset_command(stripped, values).into_iter().collect();
        }

        let Some(item) = model.find_data_item(key) else {
            if self.logged_once.insert(key.to_string()) {
                warn!("unresolved data item key '{key}' (device {device:?})");
            }
            return Vec::new();
        };

        match self.map_observation(item, timestamp, values) {
            Ok(obs) => vec![MappedItem::Observation(obs)],
            Err(err) => {
                debug!("{err}");
                vec![MappedItem::Observation(unavailable_observation(item, timestamp))]
            }
        }
    }

    fn map_asset_command(&mut self, command: &str, values: &[String]) -> Option<MappedItem> {
        match command {
            "ASSET@" | "UPDATE_ASSET@" => {
                let asset_id = values.first().cloned().unwrap_or_default();
                let asset_type = values.get(1).cloned().unwrap_or_default();
                let body = values.get(2..).map(|rest| rest.join("|")).unwrap_or_default();

                if let Some(tag) = body.strip_prefix("--multiline--").filter(|tag| !tag.is_empty()) {
                    self.multiline = Some(MultilineAsset {
                        tag: tag.to_string(),
                        asset_id,
                        asset_type,
                        is_update: command == "UPDATE_ASSET@",
                        device_uuid: self.current_device.clone(),
                        lines: Vec::new(),
                    });
                    return None;
                }

                if command == "ASSET@" {
                    Some(MappedItem::AssetCommand(AssetCommand::Asset {
                        asset_id,
                        asset_type,
                        device_uuid: self.current_device.clone(),
                        body,
                    }))
                } else {
                    Some(MappedItem::AssetCommand(AssetCommand::UpdateAsset { asset_id, body }))
                }
            }
            "REMOVE_ASSET@" => {
                Some(MappedItem::AssetCommand(AssetCommand::RemoveAsset { asset_id: values.first().cloned() }))
            }
            "REMOVE_ALL_ASSETS@" => {
                Some(MappedItem::AssetCommand(AssetCommand::RemoveAllAssets { asset_type: values.first().cloned() }))
            }
            _ => None,
        }
    }

    fn map_observation(
        &self,
        item: &DataItemDef,
        timestamp: Timestamp,
        values: &[String],
    ) -> Result<Observation, PipelineError> {
        use device_model::Representation::*;

        let value = match item.category {
            Category::Condition => map_condition(item, values)?,
            Category::Event if item.r#type == "MESSAGE" => map_message(item, values)?,
            Category::Event if item.representation == DataSet => map_data_set(item, values)?,
            Category::Event if item.representation == Table => map_table(item, values)?,
            Category::Event => map_plain_event(item, values)?,
            Category::Sample if item.representation == TimeSeries => map_timeseries(item, values)?,
            Category::Sample => return map_sample(item, values),
        };

        Ok(Observation {
            data_item_id: item.id.clone(),
            name: item.name.clone(),
            sub_type: item.sub_type.clone(),
            statistic: item.statistic.clone(),
            composition_id: item.composition_id.clone(),
            sequence: 0,
            timestamp,
            unavailable: false,
            reset_triggered: None,
            value,
        })
    }
}

fn require(values: &[String], count: usize, key: &str) -> Result<(), PipelineError> {
    if values.len() < count {
        return Err(PipelineError::FieldCountMismatch { key: key.to_string(), expected: count, got: values.len() });
    }
    Ok(())
}

fn is_unavailable(s: &str) -> bool {
    s == "UNAVAILABLE"
}

fn unavailable_observation(item: &DataItemDef, timestamp: Timestamp) -> Observation {
    let value = match item.category {
        Category::Condition => ObservationValue::Condition(ConditionObservation {
            level: ConditionLevel::Unavailable,
            native_code: None,
            native_severity: None,
            qualifier: None,
            message: None,
        }),
        Category::Event => ObservationValue::Event("UNAVAILABLE".to_string()),
        Category::Sample => ObservationValue::Sample(0.0),
    };
    Observation {
        data_item_id: item.id.clone(),
        name: item.name.clone(),
        sub_type: item.sub_type.clone(),
        statistic: item.statistic.clone(),
        composition_id: item.composition_id.clone(),
        sequence: 0,
        timestamp,
        unavailable: true,
        reset_triggered: None,
        value,
    }
}

fn map_sample(item: &DataItemDef, values: &[String]) -> Result<Observation, PipelineError> {
    require(values, 1, &item.id)?;
    let raw = values[0].trim();

    if is_unavailable(raw) {
        return Ok(Observation {
            data_item_id: item.id.clone(),
            name: item.name.clone(),
            sub_type: item.sub_type.clone(),
            statistic: item.statistic.clone(),
            composition_id: item.composition_id.clone(),
            sequence: 0,
            timestamp: Timestamp::now(),
            unavailable: true,
            reset_triggered: None,
            value: ObservationValue::Sample(0.0),
        });
    }

    let (numeric_part, trigger) = match item.reset_trigger {
        Some(_) => match raw.split_once(':') {
            Some((value, trigger)) => (value, Some(trigger.to_string())),
            None => (raw, None),
        },
        None => (raw, None),
    };

    let value = numeric_part
        .parse::<f64>()
        .map_err(|_| PipelineError::ConversionFailure { data_item_id: item.id.clone(), value: raw.to_string() })?;

    Ok(Observation {
        data_item_id: item.id.clone(),
        name: item.name.clone(),
        sub_type: item.sub_type.clone(),
        statistic: item.statistic.clone(),
        composition_id: item.composition_id.clone(),
        sequence: 0,
        timestamp: Timestamp::now(),
        unavailable: false,
        reset_triggered: trigger,
        value: ObservationValue::Sample(value),
    })
}

fn map_timeseries(item: &DataItemDef, values: &[String]) -> Result<ObservationValue, PipelineError> {
    require(values, 2, &item.id)?;
    let sample_count: u32 = values[0]
        .parse()
        .map_err(|_| PipelineError::ConversionFailure { data_item_id: item.id.clone(), value: values[0].clone() })?;
    let sample_rate: f64 = values[1]
        .parse()
        .map_err(|_| PipelineError::ConversionFailure { data_item_id: item.id.clone(), value: values[1].clone() })?;

    let mut points = Vec::with_capacity(sample_count as usize);
    for token in values[2..].iter().flat_map(|s| s.split_whitespace()) {
        let v: f64 = token
            .parse()
            .map_err(|_| PipelineError::ConversionFailure { data_item_id: item.id.clone(), value: token.to_string() })?;
        points.push(v);
    }

    Ok(ObservationValue::Timeseries { values: points, sample_rate, sample_count })
}

fn map_plain_event(item: &DataItemDef, values: &[String]) -> Result<ObservationValue, PipelineError> {
    require(values, 1, &item.id)?;
    Ok(ObservationValue::Event(values[0].trim().to_string()))
}

fn map_message(item: &DataItemDef, values: &[String]) -> Result<ObservationValue, PipelineError> {
    require(values, 2, &item.id)?;
    let native_code = if values[0].is_empty() { None } else { Some(values[0].clone()) };
    Ok(ObservationValue::Message { native_code, value: values[1].clone() })
}

fn map_condition(item: &DataItemDef, values: &[String]) -> Result<ObservationValue, PipelineError> {
    require(values, 1, &item.id)?;
    let level = match values[0].trim() {
        "NORMAL" => ConditionLevel::Normal,
        "WARNING" => ConditionLevel::Warning,
        "FAULT" => ConditionLevel::Fault,
        "UNAVAILABLE" => ConditionLevel::Unavailable,
        other => {
            return Err(PipelineError::ConversionFailure { data_item_id: item.id.clone(), value: other.to_string() });
        }
    };
    let opt = |i: usize| values.get(i).filter(|s| !s.is_empty()).cloned();

    Ok(ObservationValue::Condition(ConditionObservation {
        level,
        native_code: opt(1),
        native_severity: opt(2),
        qualifier: opt(3),
        message: opt(4),
    }))
}

/// Parses `key=value key=value ...` with `{...}`-quoted values; an empty
/// value after `=` marks the entry removed. A leading `:TRIGGER ` token
/// resets the set before applying entries (handled by the caller, which
/// owns the retained set).
fn parse_entries(field: &str) -> Vec<DataSetEntry> {
    let mut entries = Vec::new();
    let mut chars = field.trim().chars().peekable();

    while chars.peek().is_some() {
        while chars.peek() == Some(&' ') {
            chars.next();
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ' ' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() {
            break;
        }
        if chars.peek() != Some(&'=') {
            continue;
        }
        chars.next(); // consume '='

        let mut value = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                value.push(c);
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ' ' {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }

        let removed = value.is_empty();
        entries.push(DataSetEntry { key, value: parse_scalar(&value), removed });
    }

    entries
}

fn parse_scalar(raw: &str) -> ScalarValue {
    if let Ok(i) = raw.parse::<i64>() {
        ScalarValue::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        ScalarValue::Double(f)
    } else {
        ScalarValue::String(raw.to_string())
    }
}

fn map_data_set(item: &DataItemDef, values: &[String]) -> Result<ObservationValue, PipelineError> {
    require(values, 1, &item.id)?;
    let field = values[0].strip_prefix(":TRIGGER").unwrap_or(&values[0]);
    Ok(ObservationValue::DataSetEvent(parse_entries(field)))
}

fn map_table(item: &DataItemDef, values: &[String]) -> Result<ObservationValue, PipelineError> {
    require(values, 1, &item.id)?;
    let field = values[0].strip_prefix(":TRIGGER").unwrap_or(&values[0]);

    let mut rows = Vec::new();
    let mut chars = field.trim().chars().peekable();
    while chars.peek().is_some() {
        while chars.peek() == Some(&' ') {
            chars.next();
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ' ' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() {
            break;
        }
        if chars.peek() != Some(&'=') {
            continue;
        }
        chars.next();

        let mut cell_body = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                cell_body.push(c);
            }
        }
        let removed = cell_body.is_empty();
        let cells = parse_entries(&cell_body);
        rows.push(TableEntry { key, cells, removed });
    }

    Ok(ObservationValue::TableEvent(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use device_model::{Category, DataItemDefInput, DeviceModel, Representation};

    fn model_with(category: Category, representation: Representation, r#type: &str) -> DeviceModel {
        let mut builder = DeviceModel::builder();
        let device = builder.add_device("d1", None);
        let component = builder.add_component(device, None, "c");
        builder
            .add_data_item(DataItemDefInput {
                id: "v1".to_string(),
                name: None,
                source: None,
                category,
                representation,
                r#type: r#type.to_string(),
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
    fn maps_plain_event() {
        let model = model_with(Category::Event, Representation::Value, "EXECUTION");
        let mut mapper = TokenMapper::new();
        let fields = vec!["v1".to_string(), "READY".to_string()];
        let items = mapper.map_line(&model, Timestamp::now(), &fields);
        assert_eq!(items.len(), 1);
        match &items[0] {
            MappedItem::Observation(obs) => assert_eq!(obs.value, ObservationValue::Event("READY".to_string())),
            _ => panic!("expected observation"),
        }
    }

    #[test]
    fn data_set_with_removal() {
        let model = model_with(Category::Event, Representation::DataSet, "VARIABLE");
        let mut mapper = TokenMapper::new();
        let first = vec!["v1".to_string(), "a=1 b=2 c={abc}".to_string()];
        let items = mapper.map_line(&model, Timestamp::now(), &first);
        let MappedItem::Observation(obs) = &items[0] else { panic!() };
        let ObservationValue::DataSetEvent(entries) = &obs.value else { panic!() };
        assert_eq!(entries.len(), 3);

        let second = vec!["v1".to_string(), "c=".to_string()];
        let items = mapper.map_line(&model, Timestamp::now(), &second);
        let MappedItem::Observation(obs) = &items[0] else { panic!() };
        let ObservationValue::DataSetEvent(entries) = &obs.value else { panic!() };
        assert!(entries[0].removed);
        assert_eq!(entries[0].key, "c");
    }

    #[test]
    fn multiline_asset_accumulates_until_terminator() {
        let model = model_with(Category::Event, Representation::Value, "EXECUTION");
        let mut mapper = TokenMapper::new();

        let opener =
            vec!["@ASSET@".to_string(), "A1".to_string(), "CuttingTool".to_string(), "--multiline--XYZ".to_string()];
        assert!(mapper.map_line(&model, Timestamp::now(), &opener).is_empty());
        assert!(mapper.is_accumulating_multiline());

        assert!(mapper.accumulate_multiline("<CuttingTool>").is_none());
        assert!(mapper.accumulate_multiline("  <Life>100</Life>").is_none());

        let item = mapper.accumulate_multiline("--multiline--XYZ").expect("terminator closes the asset");
        assert!(!mapper.is_accumulating_multiline());

        let MappedItem::AssetCommand(AssetCommand::Asset { asset_id, asset_type, body, .. }) = item else {
            panic!("expected an Asset command")
        };
        assert_eq!(asset_id, "A1");
        assert_eq!(asset_type, "CuttingTool");
        assert_eq!(body, "<CuttingTool>\n  <Life>100</Life>");
    }

    #[test]
    fn discard_multiline_drops_partial_accumulation() {
        let model = model_with(Category::Event, Representation::Value, "EXECUTION");
        let mut mapper = TokenMapper::new();
        let opener =
            vec!["@ASSET@".to_string(), "A1".to_string(), "CuttingTool".to_string(), "--multiline--XYZ".to_string()];
        mapper.map_line(&model, Timestamp::now(), &opener);
        assert!(mapper.is_accumulating_multiline());

        mapper.discard_multiline();
        assert!(!mapper.is_accumulating_multiline());
    }

    #[test]
    fn unresolved_key_logged_once_and_dropped() {
        let model = model_with(Category::Event, Representation::Value, "EXECUTION");
        let mut mapper = TokenMapper::new();
        let fields = vec!["missing".to_string(), "x".to_string()];
        assert!(mapper.map_line(&model, Timestamp::now(), &fields).is_empty());
        assert!(mapper.map_line(&model, Timestamp::now(), &fields).is_empty());
    }

    #[test]
    fn condition_maps_five_fields() {
        let model = model_with(Category::Condition, Representation::Value, "SYSTEM");
        let mut mapper = TokenMapper::new();
        let fields =
            vec!["v1".to_string(), "FAULT".to_string(), "400".to_string(), "1".to_string(), "HIGH".to_string(), "overtemp".to_string()];
        let items = mapper.map_line(&model, Timestamp::now(), &fields);
        let MappedItem::Observation(obs) = &items[0] else { panic!() };
        let ObservationValue::Condition(c) = &obs.value else { panic!() };
        assert_eq!(c.level, ConditionLevel::Fault);
        assert_eq!(c.native_code.as_deref(), Some("400"));
    }

    #[test]
    fn conversion_failure_yields_unavailable_but_continues() {
        let model = model_with(Category::Sample, Representation::Value, "ROTARY_VELOCITY");
        let mut mapper = TokenMapper::new();
        let fields = vec!["v1".to_string(), "not-a-number".to_string()];
        let items = mapper.map_line(&model, Timestamp::now(), &fields);
        let MappedItem::Observation(obs) = &items[0] else { panic!() };
        assert!(obs.unavailable);
    }
}
