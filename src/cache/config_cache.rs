//! Per-tag display metadata derived from uploaded configuration

use crate::protocol::edge::{ConfigAction, DeviceConfig, EdgeConfig, TagType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Formatting properties remembered for one tag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagProperties {
    #[serde(rename = "Type")]
    pub tag_type: TagType,
    #[serde(rename = "SH", default, skip_serializing_if = "Option::is_none")]
    pub span_high: Option<f64>,
    #[serde(rename = "SL", default, skip_serializing_if = "Option::is_none")]
    pub span_low: Option<f64>,
    #[serde(rename = "IDF", default, skip_serializing_if = "Option::is_none")]
    pub integer_display_format: Option<u32>,
    #[serde(rename = "FDF", default, skip_serializing_if = "Option::is_none")]
    pub fraction_display_format: Option<u32>,
}

impl TagProperties {
    fn of_type(tag_type: TagType) -> Self {
        Self {
            tag_type,
            span_high: None,
            span_low: None,
            integer_display_format: None,
            fraction_display_format: None,
        }
    }

    /// Overlay the properties that are set in `newer`
    fn merge(&mut self, newer: TagProperties) {
        self.tag_type = newer.tag_type;
        if newer.span_high.is_some() {
            self.span_high = newer.span_high;
        }
        if newer.span_low.is_some() {
            self.span_low = newer.span_low;
        }
        if newer.integer_display_format.is_some() {
            self.integer_display_format = newer.integer_display_format;
        }
        if newer.fraction_display_format.is_some() {
            self.fraction_display_format = newer.fraction_display_format;
        }
    }
}

type TagMap = BTreeMap<String, TagProperties>;

/// Device id to tag name to properties
///
/// Serialized as the bare nested map so the cache file stays a plain JSON
/// object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigCache {
    devices: BTreeMap<String, TagMap>,
}

impl ConfigCache {
    /// Mapping derived from every device and tag named in `config`
    pub fn from_config(config: &EdgeConfig) -> Self {
        let devices = config
            .node
            .device_list
            .iter()
            .map(|device| (device.id.clone(), tag_map(device)))
            .collect();
        Self { devices }
    }

    /// Replace everything with the mapping derived from `config`
    pub fn overwrite(&mut self, config: &EdgeConfig) {
        *self = Self::from_config(config);
    }

    /// Add or refresh the devices and tags named in `config`
    pub fn update(&mut self, config: &EdgeConfig) {
        for device in &config.node.device_list {
            let tags = self.devices.entry(device.id.clone()).or_default();
            for (name, properties) in tag_map(device) {
                match tags.get_mut(&name) {
                    Some(existing) => existing.merge(properties),
                    None => {
                        tags.insert(name, properties);
                    }
                }
            }
        }
    }

    /// Remove the named tags, or whole devices listed without tags
    pub fn delete(&mut self, config: &EdgeConfig) {
        for device in &config.node.device_list {
            if device.has_no_tags() {
                self.devices.remove(&device.id);
                continue;
            }
            let Some(tags) = self.devices.get_mut(&device.id) else {
                continue;
            };
            for name in tag_names(device) {
                tags.remove(name);
            }
        }
    }

    /// Apply the cache effect of a config upload
    pub fn apply(&mut self, action: ConfigAction, config: &EdgeConfig) {
        match action {
            ConfigAction::Create | ConfigAction::Delsert => self.overwrite(config),
            ConfigAction::Update => self.update(config),
            ConfigAction::Delete => self.delete(config),
        }
    }

    pub fn get(&self, device_id: &str, tag_name: &str) -> Option<&TagProperties> {
        self.devices.get(device_id)?.get(tag_name)
    }

    pub fn fraction_format(&self, device_id: &str, tag_name: &str) -> Option<u32> {
        self.get(device_id, tag_name)?.fraction_display_format
    }

    pub fn contains_device(&self, device_id: &str) -> bool {
        self.devices.contains_key(device_id)
    }

    /// Number of cached tags across all devices
    pub fn tag_count(&self) -> usize {
        self.devices.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

fn tag_map(device: &DeviceConfig) -> TagMap {
    let mut tags = TagMap::new();
    for tag in &device.analog_tag_list {
        tags.insert(
            tag.name.clone(),
            TagProperties {
                span_high: tag.span_high,
                span_low: tag.span_low,
                integer_display_format: tag.integer_display_format,
                fraction_display_format: tag.fraction_display_format,
                ..TagProperties::of_type(TagType::Analog)
            },
        );
    }
    for tag in &device.discrete_tag_list {
        tags.insert(tag.name.clone(), TagProperties::of_type(TagType::Discrete));
    }
    for tag in &device.text_tag_list {
        tags.insert(tag.name.clone(), TagProperties::of_type(TagType::Text));
    }
    tags
}

fn tag_names(device: &DeviceConfig) -> impl Iterator<Item = &str> {
    device
        .analog_tag_list
        .iter()
        .map(|t| t.name.as_str())
        .chain(device.discrete_tag_list.iter().map(|t| t.name.as_str()))
        .chain(device.text_tag_list.iter().map(|t| t.name.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::edge::{AnalogTagConfig, DiscreteTagConfig, NodeConfig, TextTagConfig};

    fn config(devices: Vec<DeviceConfig>) -> EdgeConfig {
        EdgeConfig {
            node: NodeConfig {
                device_list: devices,
                ..NodeConfig::default()
            },
        }
    }

    fn analog(name: &str, fdf: u32) -> AnalogTagConfig {
        AnalogTagConfig::new(name).with_fraction_display_format(fdf)
    }

    #[test]
    fn test_overwrite_replaces_everything() {
        let mut cache = ConfigCache::from_config(&config(vec![
            DeviceConfig::new("D1")
                .with_analog_tag(analog("A1", 2))
                .with_analog_tag(analog("A2", 3)),
            DeviceConfig::new("D2").with_text_tag(TextTagConfig::new("T1")),
        ]));
        assert_eq!(cache.tag_count(), 3);

        cache.overwrite(&config(vec![
            DeviceConfig::new("D1").with_analog_tag(analog("A1", 1))
        ]));

        assert_eq!(cache.fraction_format("D1", "A1"), Some(1));
        assert!(cache.get("D1", "A2").is_none());
        assert!(!cache.contains_device("D2"));
    }

    #[test]
    fn test_update_leaves_unmentioned_entries() {
        let mut cache = ConfigCache::from_config(&config(vec![
            DeviceConfig::new("D1")
                .with_analog_tag(analog("A1", 2).with_span(0.0, 10.0))
                .with_analog_tag(analog("A2", 3)),
            DeviceConfig::new("D2").with_discrete_tag(DiscreteTagConfig::new("S1")),
        ]));

        cache.update(&config(vec![DeviceConfig::new("D1")
            .with_analog_tag(AnalogTagConfig::new("A1").with_fraction_display_format(4))
            .with_analog_tag(analog("A3", 0))]));

        let a1 = cache.get("D1", "A1").unwrap();
        assert_eq!(a1.fraction_display_format, Some(4));
        assert_eq!(a1.span_high, Some(10.0));
        assert_eq!(cache.fraction_format("D1", "A2"), Some(3));
        assert_eq!(cache.fraction_format("D1", "A3"), Some(0));
        assert_eq!(cache.get("D2", "S1").unwrap().tag_type, TagType::Discrete);
    }

    #[test]
    fn test_delete_device_without_tags_removes_device() {
        let mut cache = ConfigCache::from_config(&config(vec![
            DeviceConfig::new("D1").with_analog_tag(analog("A1", 2)),
            DeviceConfig::new("D2").with_analog_tag(analog("A1", 2)),
        ]));

        cache.delete(&config(vec![DeviceConfig::new("D1")]));

        assert!(!cache.contains_device("D1"));
        assert!(cache.contains_device("D2"));
    }

    #[test]
    fn test_delete_with_tags_removes_only_those_tags() {
        let mut cache = ConfigCache::from_config(&config(vec![DeviceConfig::new("D1")
            .with_analog_tag(analog("A1", 2))
            .with_analog_tag(analog("A2", 2))]));

        cache.delete(&config(vec![
            DeviceConfig::new("D1").with_analog_tag(AnalogTagConfig::new("A1"))
        ]));

        assert!(cache.get("D1", "A1").is_none());
        assert!(cache.get("D1", "A2").is_some());
    }

    #[test]
    fn test_delete_missing_keys_is_noop() {
        let mut cache = ConfigCache::from_config(&config(vec![
            DeviceConfig::new("D1").with_analog_tag(analog("A1", 2))
        ]));
        let before = cache.clone();

        cache.delete(&config(vec![
            DeviceConfig::new("D9"),
            DeviceConfig::new("D8").with_text_tag(TextTagConfig::new("T1")),
            DeviceConfig::new("D1").with_text_tag(TextTagConfig::new("missing")),
        ]));

        assert_eq!(cache, before);
    }

    #[test]
    fn test_apply_dispatches_by_action() {
        let mut cache = ConfigCache::default();
        let full = config(vec![DeviceConfig::new("D1").with_analog_tag(analog("A1", 2))]);

        cache.apply(ConfigAction::Create, &full);
        assert_eq!(cache.tag_count(), 1);
        cache.apply(ConfigAction::Delete, &config(vec![DeviceConfig::new("D1")]));
        assert!(cache.is_empty());
        cache.apply(ConfigAction::Delsert, &full);
        assert_eq!(cache.fraction_format("D1", "A1"), Some(2));
    }

    #[test]
    fn test_file_format_is_plain_nested_map() {
        let cache = ConfigCache::from_config(&config(vec![
            DeviceConfig::new("D1").with_analog_tag(analog("A1", 2))
        ]));
        let json = serde_json::to_value(&cache).unwrap();
        assert_eq!(json, serde_json::json!({"D1": {"A1": {"Type": 1, "FDF": 2}}}));

        // Unknown properties written by older agents are ignored
        let loaded: ConfigCache =
            serde_json::from_str(r#"{"D1":{"A1":{"Type":1,"SWVC":false,"FDF":3}}}"#).unwrap();
        assert_eq!(loaded.fraction_format("D1", "A1"), Some(3));
    }
}
