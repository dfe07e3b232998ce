//! Parses an upstream MTConnect agent's XML response into a flat
//! [`ResponseDocument`], materialising observations against a collaborator
//! [`DeviceModel`] (§4.12, §4.13).

use device_model::{
    AssetCommand, AssetEvent, ConditionLevel, ConditionObservation, DataSetEntry, DeviceModel, Observation,
    ObservationValue, ScalarValue, TableEntry,
};
use jiff::Timestamp;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::QName;

use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseEntity {
    Observation(Observation),
    AssetCommand(AssetCommand),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResponseError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseDocument {
    pub instance_id: Option<u64>,
    /// Packed as `major * 1000 + minor` from an "X.Y" version string.
    pub agent_version: Option<u32>,
    pub next: Option<u64>,
    pub entities: Vec<ResponseEntity>,
    pub asset_events: Vec<AssetEvent>,
    pub errors: Vec<ResponseError>,
}

fn attr_value(tag: &BytesStart<'_>, name: &str) -> Option<String> {
    tag.attributes()
        .filter_map(Result::ok)
        .find(|a| a.key == QName(name.as_bytes()))
        .and_then(|a| a.unescape_value().ok().map(|v| v.to_string()))
}

fn local_name(name: QName<'_>) -> String {
    String::from_utf8_lossy(name.local_name().as_ref()).to_string()
}

pub fn parse_agent_version(raw: &str) -> Result<u32, ParseError> {
    let mut parts = raw.split('.');
    let major: u32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(|| ParseError::MalformedVersion(raw.to_string()))?;
    let minor: u32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(|| ParseError::MalformedVersion(raw.to_string()))?;
    Ok(major * 1000 + minor)
}

struct OpenObservation {
    tag: String,
    data_item_id: String,
    name: Option<String>,
    sub_type: Option<String>,
    statistic: Option<String>,
    composition_id: Option<String>,
    sequence: u64,
    timestamp: Timestamp,
    reset_triggered: Option<String>,
    text: String,
    entries: Vec<DataSetEntry>,
    tables: Vec<TableEntry>,
}

enum Frame {
    Generic,
    DataItem(OpenObservation),
    Entry { key: String, removed: bool, text: String, cells: Vec<DataSetEntry> },
    Cell { key: String, text: String },
    Error { code: String, text: String },
}

/// Parses an upstream response document. `model` resolves data item ids to
/// categories so the parser knows how to interpret each element's body;
/// ids absent from the model are skipped with a warning.
pub fn parse_response(xml: &str, model: &DeviceModel) -> Result<ResponseDocument, ParseError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut doc = ResponseDocument::default();
    let mut root_seen = false;
    let mut stack: Vec<Frame> = Vec::new();

    loop {
        match reader.read_event().map_err(ParseError::Xml)? {
            Event::Eof => break,
            Event::Start(tag) => {
                open_tag(&tag, &mut root_seen, &mut doc, &mut stack, model)?;
            }
            Event::Empty(tag) => {
                open_tag(&tag, &mut root_seen, &mut doc, &mut stack, model)?;
                close_tag(&mut doc, &mut stack);
            }
            Event::Text(text) => {
                let decoded = text.unescape().unwrap_or_default().to_string();
                match stack.last_mut() {
                    Some(Frame::DataItem(open)) => open.text.push_str(&decoded),
                    Some(Frame::Entry { text, .. }) => text.push_str(&decoded),
                    Some(Frame::Cell { text, .. }) => text.push_str(&decoded),
                    Some(Frame::Error { text, .. }) => text.push_str(&decoded),
                    _ => {}
                }
            }
            Event::End(_) => close_tag(&mut doc, &mut stack),
            _ => {}
        }
    }

    Ok(doc)
}

fn open_tag(
    tag: &BytesStart<'_>,
    root_seen: &mut bool,
    doc: &mut ResponseDocument,
    stack: &mut Vec<Frame>,
    model: &DeviceModel,
) -> Result<(), ParseError> {
    let name = local_name(tag.name());

    if !*root_seen {
        *root_seen = true;
        match name.as_str() {
            "MTConnectStreams" | "MTConnectDevices" | "MTConnectAssets" | "MTConnectError" => {}
            other => return Err(ParseError::UnknownRoot(other.to_string())),
        }
        return Ok(());
    }

    match name.as_str() {
        "Header" => {
            doc.instance_id = attr_value(tag, "instanceId").and_then(|v| v.parse().ok());
            doc.next = attr_value(tag, "nextSequence").and_then(|v| v.parse().ok());
            if let Some(version) = attr_value(tag, "version") {
                doc.agent_version = parse_agent_version(&version).ok();
            }
            stack.push(Frame::Generic);
        }
        "Error" => {
            stack.push(Frame::Error { code: attr_value(tag, "errorCode").unwrap_or_default(), text: String::new() });
        }
        "AssetChanged" => {
            doc.asset_events.push(AssetEvent {
                asset_id: attr_value(tag, "assetId").unwrap_or_default(),
                asset_type: attr_value(tag, "assetType"),
                device_uuid: attr_value(tag, "deviceUuid"),
            });
            stack.push(Frame::Generic);
        }
        "AssetRemoved" => {
            doc.entities
                .push(ResponseEntity::AssetCommand(AssetCommand::RemoveAsset { asset_id: attr_value(tag, "assetId") }));
            stack.push(Frame::Generic);
        }
        "Entry" => {
            stack.push(Frame::Entry {
                key: attr_value(tag, "key").unwrap_or_default(),
                removed: attr_value(tag, "removed").as_deref() == Some("true"),
                text: String::new(),
                cells: Vec::new(),
            });
        }
        "Cell" => {
            stack.push(Frame::Cell { key: attr_value(tag, "key").unwrap_or_default(), text: String::new() });
        }
        _ => {
            let Some(data_item_id) = attr_value(tag, "dataItemId") else {
                stack.push(Frame::Generic);
                return Ok(());
            };
            if model.find_data_item(&data_item_id).is_none() {
                log::warn!("response references unknown data item {data_item_id}, skipping");
                stack.push(Frame::Generic);
                return Ok(());
            }
            let sequence = attr_value(tag, "sequence").and_then(|v| v.parse().ok()).unwrap_or(0);
            let timestamp = attr_value(tag, "timestamp").and_then(|v| v.parse::<Timestamp>().ok()).unwrap_or(Timestamp::UNIX_EPOCH);
            stack.push(Frame::DataItem(OpenObservation {
                tag: name,
                data_item_id,
                name: attr_value(tag, "name"),
                sub_type: attr_value(tag, "subType"),
                statistic: attr_value(tag, "statistic"),
                composition_id: attr_value(tag, "compositionId"),
                sequence,
                timestamp,
                reset_triggered: attr_value(tag, "resetTriggered"),
                text: String::new(),
                entries: Vec::new(),
                tables: Vec::new(),
            }));
        }
    }

    Ok(())
}

fn close_tag(doc: &mut ResponseDocument, stack: &mut Vec<Frame>) {
    let Some(frame) = stack.pop() else { return };

    match frame {
        Frame::Generic => {}
        Frame::DataItem(open) => {
            if let Some(obs) = finish_observation(open) {
                doc.entities.push(ResponseEntity::Observation(obs));
            }
        }
        Frame::Entry { key, removed, text, cells } => {
            if let Some(Frame::DataItem(open)) = stack.last_mut() {
                if cells.is_empty() {
                    open.entries.push(DataSetEntry { key, value: parse_scalar(&text), removed });
                } else {
                    open.tables.push(TableEntry { key, cells, removed });
                }
            }
        }
        Frame::Cell { key, text } => {
            if let Some(Frame::Entry { cells, removed, .. }) = stack.last_mut() {
                cells.push(DataSetEntry { key, value: parse_scalar(&text), removed: *removed });
            }
        }
        Frame::Error { code, text } => {
            doc.errors.push(ResponseError { code, message: text.trim().to_string() });
        }
    }
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

fn finish_observation(open: OpenObservation) -> Option<Observation> {
    let unavailable = open.text.trim() == "UNAVAILABLE";

    let value = if let Some(level) = condition_level(&open.tag) {
        ObservationValue::Condition(ConditionObservation {
            level,
            native_code: None,
            native_severity: None,
            qualifier: None,
            message: Some(open.text.clone()),
        })
    } else if !open.tables.is_empty() {
        ObservationValue::TableEvent(open.tables)
    } else if !open.entries.is_empty() {
        ObservationValue::DataSetEvent(open.entries)
    } else if open.tag == "Message" {
        ObservationValue::Message { native_code: None, value: open.text.clone() }
    } else if let Ok(scalar) = open.text.trim().parse::<f64>() {
        ObservationValue::Sample(scalar)
    } else {
        ObservationValue::Event(open.text.clone())
    };

    Some(Observation {
        data_item_id: open.data_item_id,
        name: open.name,
        sub_type: open.sub_type,
        statistic: open.statistic,
        composition_id: open.composition_id,
        sequence: open.sequence,
        timestamp: open.timestamp,
        unavailable,
        reset_triggered: open.reset_triggered,
        value,
    })
}

fn condition_level(tag: &str) -> Option<ConditionLevel> {
    match tag {
        "Normal" => Some(ConditionLevel::Normal),
        "Warning" => Some(ConditionLevel::Warning),
        "Fault" => Some(ConditionLevel::Fault),
        "Unavailable" => Some(ConditionLevel::Unavailable),
        _ => None,
    }
}
