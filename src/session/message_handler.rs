//! Decoding of inbound broker messages
//!
//! Pure functions only. `Ok(None)` means the message is well formed but
//! carries nothing for the caller (unknown command, rejected-by-shape ack);
//! `Err` means it was malformed. The session drops both silently apart
//! from a log line.

use crate::protocol::edge::{
    ConfigAckMessage, MessageReceived, TimeSyncMessage, WriteDataMessage, WriteDevice, WriteTag,
};
use crate::protocol::messages::{AckMessage, CommandMessage};
use crate::protocol::topics::TopicBuilder;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

const WRITE_VALUE_COMMAND: &str = "WV";
const TIME_SYNC_COMMAND: &str = "TSyn";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Write value body must map device ids to tag objects")]
    InvalidWriteValue,
    #[error("Time sync command without a UTC value")]
    MissingUtc,
    #[error("UTC value out of range: {0}")]
    InvalidUtc(i64),
}

/// Topic-aware decoder for one session's subscriptions
#[derive(Debug, Clone)]
pub struct InboundDecoder {
    cmd_topic: String,
    ack_topic: String,
}

impl InboundDecoder {
    pub fn new(topics: &TopicBuilder) -> Self {
        Self {
            cmd_topic: topics.cmd_topic(),
            ack_topic: topics.ack_topic(),
        }
    }

    /// Decode a message received on `topic`
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<Option<MessageReceived>, DecodeError> {
        if topic == self.cmd_topic {
            decode_command(payload, Utc::now())
        } else if topic == self.ack_topic {
            decode_ack(payload)
        } else {
            Ok(None)
        }
    }
}

/// Decode a command payload; `now` stamps write requests without a usable `ts`
pub fn decode_command(
    payload: &[u8],
    now: DateTime<Utc>,
) -> Result<Option<MessageReceived>, DecodeError> {
    let message: CommandMessage =
        serde_json::from_slice(payload).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    match message.d.cmd.as_str() {
        WRITE_VALUE_COMMAND => {
            let timestamp = message
                .ts
                .as_deref()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.with_timezone(&Utc))
                .unwrap_or(now);
            let device_list = decode_write_devices(&message.d.val)?;
            Ok(Some(MessageReceived::WriteValue(WriteDataMessage {
                device_list,
                timestamp,
            })))
        }
        TIME_SYNC_COMMAND => {
            let seconds = message.d.utc.ok_or(DecodeError::MissingUtc)?;
            let utc_time =
                DateTime::<Utc>::from_timestamp(seconds, 0).ok_or(DecodeError::InvalidUtc(seconds))?;
            Ok(Some(MessageReceived::TimeSync(TimeSyncMessage { utc_time })))
        }
        _ => Ok(None),
    }
}

fn decode_write_devices(val: &Value) -> Result<Vec<WriteDevice>, DecodeError> {
    let devices = val.as_object().ok_or(DecodeError::InvalidWriteValue)?;
    devices
        .iter()
        .map(|(device_id, tags)| {
            let tags = tags.as_object().ok_or(DecodeError::InvalidWriteValue)?;
            Ok(WriteDevice {
                id: device_id.clone(),
                tag_list: tags
                    .iter()
                    .map(|(name, value)| WriteTag {
                        name: name.clone(),
                        value: value.clone(),
                    })
                    .collect(),
            })
        })
        .collect()
}

/// Decode a config ack; only a numeric `Cfg` produces an event
pub fn decode_ack(payload: &[u8]) -> Result<Option<MessageReceived>, DecodeError> {
    let message: AckMessage =
        serde_json::from_slice(payload).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

    Ok(message
        .d
        .cfg
        .as_ref()
        .and_then(Value::as_f64)
        .map(|value| MessageReceived::ConfigAck(ConfigAckMessage { result: value > 0.0 })))
}
