//! Wire records exchanged with the broker
//!
//! Every payload is an envelope `{"ts": ..., "d": ...}` whose body type is
//! fixed per message kind. Outbound bodies are serialize-only; inbound
//! command and ack bodies are decoded leniently and validated by the
//! session's message handler.

use crate::codec::config_payload::NodeTree;
use crate::protocol::edge::{ConfigAction, TagValue};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Envelope shared by every outbound payload
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Envelope<T> {
    pub ts: String,
    pub d: T,
}

impl<T: Serialize> Envelope<T> {
    /// Wrap a body stamped with the current UTC time
    pub fn now(d: T) -> Self {
        Self::at(Utc::now(), d)
    }

    /// Wrap a body stamped with `timestamp`, rendered to whole seconds
    pub fn at(timestamp: DateTime<Utc>, d: T) -> Self {
        Self {
            ts: timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            d,
        }
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Published by the broker on our behalf after an unclean disconnect
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct WillData {
    #[serde(rename = "UeD")]
    pub unexpected_disconnect: u8,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct HeartbeatData {
    #[serde(rename = "Hbt")]
    pub heartbeat: u8,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct ConnectData {
    #[serde(rename = "Con")]
    pub connected: u8,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct DisconnectData {
    #[serde(rename = "DsC")]
    pub disconnected: u8,
}

/// Device id to status code
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StatusData {
    #[serde(rename = "Dev")]
    pub devices: BTreeMap<String, u8>,
}

/// Device id to tag name to value
pub type TagData = BTreeMap<String, BTreeMap<String, TagValue>>;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ConfigData {
    #[serde(rename = "Action")]
    pub action: ConfigAction,
    /// Node id to node tree
    #[serde(rename = "Scada")]
    pub scada: BTreeMap<String, NodeTree>,
}

pub fn will_message() -> Envelope<WillData> {
    Envelope::now(WillData {
        unexpected_disconnect: 1,
    })
}

pub fn heartbeat_message() -> Envelope<HeartbeatData> {
    Envelope::now(HeartbeatData { heartbeat: 1 })
}

pub fn connect_message() -> Envelope<ConnectData> {
    Envelope::now(ConnectData { connected: 1 })
}

pub fn disconnect_message() -> Envelope<DisconnectData> {
    Envelope::now(DisconnectData { disconnected: 1 })
}

/// Inbound command: `{"ts": ..., "d": {"Cmd": ..., "Val": ..., "UTC": ...}}`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct CommandMessage {
    #[serde(default, alias = "Ts")]
    pub ts: Option<String>,
    #[serde(alias = "D")]
    pub d: CommandBody,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct CommandBody {
    #[serde(rename = "Cmd", default)]
    pub cmd: String,
    #[serde(rename = "Val", default)]
    pub val: Value,
    #[serde(rename = "UTC", default)]
    pub utc: Option<i64>,
}

/// Inbound config acknowledgement: `{"ts": ..., "d": {"Cfg": ...}}`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AckMessage {
    #[serde(default, alias = "Ts")]
    pub ts: Option<String>,
    #[serde(alias = "D")]
    pub d: AckBody,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AckBody {
    #[serde(rename = "Cfg", default)]
    pub cfg: Option<Value>,
}
