//! Caller-facing data model
//!
//! Tag readings, device status reports, and the structured node/device/tag
//! configuration that `upload_config` turns into a config payload. Every
//! optional property is an `Option` so that only what the caller set reaches
//! the wire.

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Config upload action, sent as the numeric `Action` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ConfigAction {
    Create = 1,
    Update = 2,
    Delete = 3,
    /// Delete then insert: replaces the whole node configuration
    Delsert = 4,
}

impl From<ConfigAction> for u8 {
    fn from(action: ConfigAction) -> Self {
        action as u8
    }
}

impl TryFrom<u8> for ConfigAction {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ConfigAction::Create),
            2 => Ok(ConfigAction::Update),
            3 => Ok(ConfigAction::Delete),
            4 => Ok(ConfigAction::Delsert),
            other => Err(format!("unknown config action {other}")),
        }
    }
}

/// Kind of tag, sent as the numeric `Type` property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TagType {
    Analog = 1,
    Discrete = 2,
    Text = 3,
}

impl From<TagType> for u8 {
    fn from(tag_type: TagType) -> Self {
        tag_type as u8
    }
}

impl TryFrom<u8> for TagType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TagType::Analog),
            2 => Ok(TagType::Discrete),
            3 => Ok(TagType::Text),
            other => Err(format!("unknown tag type {other}")),
        }
    }
}

/// Value of a single tag reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Integer(i64),
    Number(f64),
    Bool(bool),
    Text(String),
    Array(Vec<TagValue>),
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        TagValue::Number(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        TagValue::Integer(value)
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        TagValue::Bool(value)
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Text(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Text(value)
    }
}

impl<T: Into<TagValue>> From<Vec<T>> for TagValue {
    fn from(values: Vec<T>) -> Self {
        TagValue::Array(values.into_iter().map(Into::into).collect())
    }
}

/// One reading produced by the caller
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeTag {
    pub device_id: String,
    pub tag_name: String,
    pub value: TagValue,
}

impl EdgeTag {
    pub fn new(
        device_id: impl Into<String>,
        tag_name: impl Into<String>,
        value: impl Into<TagValue>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            tag_name: tag_name.into(),
            value: value.into(),
        }
    }
}

/// A batch of readings sharing one wall-clock timestamp
///
/// The timestamp is a local wall-clock reading; it is interpreted in the
/// host time zone when the payload is rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeData {
    pub tag_list: Vec<EdgeTag>,
    pub timestamp: NaiveDateTime,
}

impl EdgeData {
    /// Readings stamped with the current local time
    pub fn new(tag_list: Vec<EdgeTag>) -> Self {
        Self {
            tag_list,
            timestamp: Local::now().naive_local(),
        }
    }

    pub fn with_timestamp(tag_list: Vec<EdgeTag>, timestamp: NaiveDateTime) -> Self {
        Self {
            tag_list,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceStatus {
    pub id: String,
    pub status: DeviceStatusCode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatusCode {
    Offline = 0,
    Online = 1,
}

/// Status report for a set of devices
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeDeviceStatus {
    pub device_list: Vec<DeviceStatus>,
    pub timestamp: DateTime<Utc>,
}

impl EdgeDeviceStatus {
    pub fn new(device_list: Vec<DeviceStatus>) -> Self {
        Self {
            device_list,
            timestamp: Utc::now(),
        }
    }
}

/// Structured configuration for one node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeConfig {
    pub node: NodeConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub primary_ip: Option<String>,
    pub backup_ip: Option<String>,
    pub primary_port: Option<u16>,
    pub backup_port: Option<u16>,
    pub node_type: Option<u8>,
    pub device_list: Vec<DeviceConfig>,
}

impl NodeConfig {
    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device_list.push(device);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub id: String,
    pub name: Option<String>,
    pub com_port_number: Option<u32>,
    pub device_type: Option<String>,
    pub description: Option<String>,
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub retention_policy_name: Option<String>,
    pub analog_tag_list: Vec<AnalogTagConfig>,
    pub discrete_tag_list: Vec<DiscreteTagConfig>,
    pub text_tag_list: Vec<TextTagConfig>,
}

impl DeviceConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_retention_policy_name(mut self, name: impl Into<String>) -> Self {
        self.retention_policy_name = Some(name.into());
        self
    }

    pub fn with_analog_tag(mut self, tag: AnalogTagConfig) -> Self {
        self.analog_tag_list.push(tag);
        self
    }

    pub fn with_discrete_tag(mut self, tag: DiscreteTagConfig) -> Self {
        self.discrete_tag_list.push(tag);
        self
    }

    pub fn with_text_tag(mut self, tag: TextTagConfig) -> Self {
        self.text_tag_list.push(tag);
        self
    }

    /// A device entry carrying no tag lists addresses the whole device
    pub fn has_no_tags(&self) -> bool {
        self.analog_tag_list.is_empty()
            && self.discrete_tag_list.is_empty()
            && self.text_tag_list.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalogTagConfig {
    pub name: String,
    pub description: Option<String>,
    pub read_only: Option<bool>,
    pub array_size: Option<u32>,
    pub span_high: Option<f64>,
    pub span_low: Option<f64>,
    pub engineer_unit: Option<String>,
    pub integer_display_format: Option<u32>,
    pub fraction_display_format: Option<u32>,
}

impl AnalogTagConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn with_array_size(mut self, size: u32) -> Self {
        self.array_size = Some(size);
        self
    }

    pub fn with_span(mut self, low: f64, high: f64) -> Self {
        self.span_low = Some(low);
        self.span_high = Some(high);
        self
    }

    pub fn with_engineer_unit(mut self, unit: impl Into<String>) -> Self {
        self.engineer_unit = Some(unit.into());
        self
    }

    pub fn with_integer_display_format(mut self, digits: u32) -> Self {
        self.integer_display_format = Some(digits);
        self
    }

    pub fn with_fraction_display_format(mut self, digits: u32) -> Self {
        self.fraction_display_format = Some(digits);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscreteTagConfig {
    pub name: String,
    pub description: Option<String>,
    pub read_only: Option<bool>,
    pub array_size: Option<u32>,
    /// Display text for states 0 through 7
    pub states: [Option<String>; 8],
}

impl DiscreteTagConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn with_array_size(mut self, size: u32) -> Self {
        self.array_size = Some(size);
        self
    }

    /// Set the display text of one state; indexes past 7 are ignored
    pub fn with_state(mut self, index: usize, text: impl Into<String>) -> Self {
        if let Some(slot) = self.states.get_mut(index) {
            *slot = Some(text.into());
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextTagConfig {
    pub name: String,
    pub description: Option<String>,
    pub read_only: Option<bool>,
    pub array_size: Option<u32>,
}

impl TextTagConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn with_array_size(mut self, size: u32) -> Self {
        self.array_size = Some(size);
        self
    }
}

/// Inbound message delivered to the on-message handler
#[derive(Debug, Clone, PartialEq)]
pub enum MessageReceived {
    WriteValue(WriteDataMessage),
    TimeSync(TimeSyncMessage),
    ConfigAck(ConfigAckMessage),
}

/// Cloud request to write tag values on devices
#[derive(Debug, Clone, PartialEq)]
pub struct WriteDataMessage {
    pub device_list: Vec<WriteDevice>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteDevice {
    pub id: String,
    pub tag_list: Vec<WriteTag>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WriteTag {
    pub name: String,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncMessage {
    pub utc_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigAckMessage {
    pub result: bool,
}
