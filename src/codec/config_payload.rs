//! Config upload payload rendering
//!
//! Turns an `EdgeConfig` into the nested node/device/tag tree published on
//! the config topic. Unset properties are left out of the tree entirely.

use crate::protocol::edge::{
    AnalogTagConfig, ConfigAction, DeviceConfig, DiscreteTagConfig, EdgeConfig, NodeConfig,
    TagType, TextTagConfig,
};
use crate::protocol::messages::{ConfigData, Envelope};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct NodeTree {
    #[serde(rename = "Hbt", skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<u64>,
    #[serde(rename = "PIP", skip_serializing_if = "Option::is_none")]
    pub primary_ip: Option<String>,
    #[serde(rename = "BIP", skip_serializing_if = "Option::is_none")]
    pub backup_ip: Option<String>,
    #[serde(rename = "PPort", skip_serializing_if = "Option::is_none")]
    pub primary_port: Option<u16>,
    #[serde(rename = "BPort", skip_serializing_if = "Option::is_none")]
    pub backup_port: Option<u16>,
    #[serde(rename = "Type", skip_serializing_if = "Option::is_none")]
    pub node_type: Option<u8>,
    #[serde(rename = "Device", skip_serializing_if = "BTreeMap::is_empty")]
    pub devices: BTreeMap<String, DeviceTree>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct DeviceTree {
    #[serde(rename = "Name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "PNbr", skip_serializing_if = "Option::is_none")]
    pub com_port_number: Option<u32>,
    #[serde(rename = "Type", skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(rename = "Desc", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "IP", skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(rename = "Port", skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(rename = "RP", skip_serializing_if = "Option::is_none")]
    pub retention_policy_name: Option<String>,
    #[serde(rename = "Tag", skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, TagTree>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TagTree {
    #[serde(rename = "Type")]
    pub tag_type: TagType,
    #[serde(rename = "Desc", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Read-only flag rendered as 0 or 1
    #[serde(rename = "RO", skip_serializing_if = "Option::is_none")]
    pub read_only: Option<u8>,
    #[serde(rename = "Ary", skip_serializing_if = "Option::is_none")]
    pub array_size: Option<u32>,
    #[serde(rename = "SH", skip_serializing_if = "Option::is_none")]
    pub span_high: Option<f64>,
    #[serde(rename = "SL", skip_serializing_if = "Option::is_none")]
    pub span_low: Option<f64>,
    #[serde(rename = "EU", skip_serializing_if = "Option::is_none")]
    pub engineer_unit: Option<String>,
    #[serde(rename = "IDF", skip_serializing_if = "Option::is_none")]
    pub integer_display_format: Option<u32>,
    #[serde(rename = "FDF", skip_serializing_if = "Option::is_none")]
    pub fraction_display_format: Option<u32>,
    #[serde(rename = "S0", skip_serializing_if = "Option::is_none")]
    pub state0: Option<String>,
    #[serde(rename = "S1", skip_serializing_if = "Option::is_none")]
    pub state1: Option<String>,
    #[serde(rename = "S2", skip_serializing_if = "Option::is_none")]
    pub state2: Option<String>,
    #[serde(rename = "S3", skip_serializing_if = "Option::is_none")]
    pub state3: Option<String>,
    #[serde(rename = "S4", skip_serializing_if = "Option::is_none")]
    pub state4: Option<String>,
    #[serde(rename = "S5", skip_serializing_if = "Option::is_none")]
    pub state5: Option<String>,
    #[serde(rename = "S6", skip_serializing_if = "Option::is_none")]
    pub state6: Option<String>,
    #[serde(rename = "S7", skip_serializing_if = "Option::is_none")]
    pub state7: Option<String>,
}

impl TagTree {
    fn new(tag_type: TagType, description: Option<&String>, read_only: Option<bool>, array_size: Option<u32>) -> Self {
        Self {
            tag_type,
            description: description.cloned(),
            read_only: read_only.map(u8::from),
            array_size,
            span_high: None,
            span_low: None,
            engineer_unit: None,
            integer_display_format: None,
            fraction_display_format: None,
            state0: None,
            state1: None,
            state2: None,
            state3: None,
            state4: None,
            state5: None,
            state6: None,
            state7: None,
        }
    }
}

impl From<&AnalogTagConfig> for TagTree {
    fn from(tag: &AnalogTagConfig) -> Self {
        Self {
            span_high: tag.span_high,
            span_low: tag.span_low,
            engineer_unit: tag.engineer_unit.clone(),
            integer_display_format: tag.integer_display_format,
            fraction_display_format: tag.fraction_display_format,
            ..Self::new(
                TagType::Analog,
                tag.description.as_ref(),
                tag.read_only,
                tag.array_size,
            )
        }
    }
}

impl From<&DiscreteTagConfig> for TagTree {
    fn from(tag: &DiscreteTagConfig) -> Self {
        let [s0, s1, s2, s3, s4, s5, s6, s7] = tag.states.clone();
        Self {
            state0: s0,
            state1: s1,
            state2: s2,
            state3: s3,
            state4: s4,
            state5: s5,
            state6: s6,
            state7: s7,
            ..Self::new(
                TagType::Discrete,
                tag.description.as_ref(),
                tag.read_only,
                tag.array_size,
            )
        }
    }
}

impl From<&TextTagConfig> for TagTree {
    fn from(tag: &TextTagConfig) -> Self {
        Self::new(
            TagType::Text,
            tag.description.as_ref(),
            tag.read_only,
            tag.array_size,
        )
    }
}

impl From<&DeviceConfig> for DeviceTree {
    fn from(device: &DeviceConfig) -> Self {
        let mut tags = BTreeMap::new();
        for tag in &device.analog_tag_list {
            tags.insert(tag.name.clone(), TagTree::from(tag));
        }
        for tag in &device.discrete_tag_list {
            tags.insert(tag.name.clone(), TagTree::from(tag));
        }
        for tag in &device.text_tag_list {
            tags.insert(tag.name.clone(), TagTree::from(tag));
        }

        Self {
            name: device.name.clone(),
            com_port_number: device.com_port_number,
            device_type: device.device_type.clone(),
            description: device.description.clone(),
            ip: device.ip.clone(),
            port: device.port,
            retention_policy_name: device.retention_policy_name.clone(),
            tags,
        }
    }
}

impl NodeTree {
    /// Full node tree, used for create, update and delsert
    pub fn full(node: &NodeConfig, heartbeat_secs: u64) -> Self {
        Self {
            heartbeat: Some(heartbeat_secs),
            primary_ip: node.primary_ip.clone(),
            backup_ip: node.backup_ip.clone(),
            primary_port: node.primary_port,
            backup_port: node.backup_port,
            node_type: node.node_type,
            devices: device_trees(node),
        }
    }

    /// Device subtree only, used for delete
    pub fn devices_only(node: &NodeConfig) -> Self {
        Self {
            devices: device_trees(node),
            ..Self::default()
        }
    }
}

fn device_trees(node: &NodeConfig) -> BTreeMap<String, DeviceTree> {
    node.device_list
        .iter()
        .map(|device| (device.id.clone(), DeviceTree::from(device)))
        .collect()
}

/// Build the config upload envelope for `node_id`
pub fn render_config(
    action: ConfigAction,
    node_id: &str,
    config: &EdgeConfig,
    heartbeat_secs: u64,
    timestamp: DateTime<Utc>,
) -> Envelope<ConfigData> {
    let tree = match action {
        ConfigAction::Delete => NodeTree::devices_only(&config.node),
        ConfigAction::Create | ConfigAction::Update | ConfigAction::Delsert => {
            NodeTree::full(&config.node, heartbeat_secs)
        }
    };

    let mut scada = BTreeMap::new();
    scada.insert(node_id.to_string(), tree);
    Envelope::at(timestamp, ConfigData { action, scada })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::edge::{AnalogTagConfig, DeviceConfig, DiscreteTagConfig, TextTagConfig};
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn sample_config() -> EdgeConfig {
        EdgeConfig {
            node: NodeConfig {
                node_type: Some(1),
                ..NodeConfig::default()
            }
            .with_device(
                DeviceConfig::new("Device1")
                    .with_name("Boiler")
                    .with_device_type("Smart Device")
                    .with_analog_tag(
                        AnalogTagConfig::new("ATag1")
                            .with_span(0.0, 1000.0)
                            .with_engineer_unit("C")
                            .with_read_only(false)
                            .with_fraction_display_format(2),
                    )
                    .with_discrete_tag(
                        DiscreteTagConfig::new("DTag1")
                            .with_state(0, "Off")
                            .with_state(1, "On"),
                    )
                    .with_text_tag(TextTagConfig::new("TTag1").with_description("label")),
            ),
        }
    }

    fn as_json(action: ConfigAction, config: &EdgeConfig) -> Value {
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        serde_json::to_value(render_config(action, "node1", config, 60, at)).unwrap()
    }

    #[test]
    fn test_create_renders_full_tree() {
        let value = as_json(ConfigAction::Create, &sample_config());
        assert_eq!(
            value,
            json!({
                "ts": "2024-01-01T00:00:00Z",
                "d": {
                    "Action": 1,
                    "Scada": {
                        "node1": {
                            "Hbt": 60,
                            "Type": 1,
                            "Device": {
                                "Device1": {
                                    "Name": "Boiler",
                                    "Type": "Smart Device",
                                    "Tag": {
                                        "ATag1": {"Type": 1, "RO": 0, "SH": 1000.0, "SL": 0.0, "EU": "C", "FDF": 2},
                                        "DTag1": {"Type": 2, "S0": "Off", "S1": "On"},
                                        "TTag1": {"Type": 3, "Desc": "label"}
                                    }
                                }
                            }
                        }
                    }
                }
            })
        );
    }

    #[test]
    fn test_delete_renders_only_devices() {
        let config = EdgeConfig {
            node: NodeConfig {
                primary_ip: Some("10.0.0.1".to_string()),
                ..NodeConfig::default()
            }
            .with_device(DeviceConfig::new("Device9")),
        };
        let value = as_json(ConfigAction::Delete, &config);
        assert_eq!(value["d"]["Action"], json!(3));
        assert_eq!(
            value["d"]["Scada"]["node1"],
            json!({"Device": {"Device9": {}}})
        );
    }

    #[test]
    fn test_unset_fields_are_omitted() {
        let config = EdgeConfig::default();
        let value = as_json(ConfigAction::Delsert, &config);
        assert_eq!(value["d"]["Action"], json!(4));
        assert_eq!(value["d"]["Scada"]["node1"], json!({"Hbt": 60}));
    }
}
