//! Topic templates for the SCADA broker namespace
//!
//! All topics live under `/wisepaas/scada/{node}`. Gateways report
//! connection state and receive commands at node level, devices at
//! `/wisepaas/scada/{node}/{device}`.

use crate::config::{AgentSection, EdgeType};

const TOPIC_ROOT: &str = "/wisepaas/scada";

/// Precomputed topic names for one agent identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicBuilder {
    node_id: String,
    device_id: String,
    edge_type: EdgeType,
}

impl TopicBuilder {
    pub fn new(node_id: impl Into<String>, device_id: impl Into<String>, edge_type: EdgeType) -> Self {
        Self {
            node_id: node_id.into(),
            device_id: device_id.into(),
            edge_type,
        }
    }

    pub fn from_section(agent: &AgentSection) -> Self {
        Self::new(&agent.node_id, &agent.device_id, agent.edge_type)
    }

    pub fn config_topic(&self) -> String {
        format!("{TOPIC_ROOT}/{}/cfg", self.node_id)
    }

    pub fn data_topic(&self) -> String {
        format!("{TOPIC_ROOT}/{}/data", self.node_id)
    }

    /// Node connection topic, also carries device status and the will
    pub fn node_conn_topic(&self) -> String {
        format!("{TOPIC_ROOT}/{}/conn", self.node_id)
    }

    pub fn device_conn_topic(&self) -> String {
        format!("{TOPIC_ROOT}/{}/{}/conn", self.node_id, self.device_id)
    }

    pub fn node_cmd_topic(&self) -> String {
        format!("{TOPIC_ROOT}/{}/cmd", self.node_id)
    }

    pub fn device_cmd_topic(&self) -> String {
        format!("{TOPIC_ROOT}/{}/{}/cmd", self.node_id, self.device_id)
    }

    pub fn ack_topic(&self) -> String {
        format!("{TOPIC_ROOT}/{}/ack", self.node_id)
    }

    pub fn cfg_ack_topic(&self) -> String {
        format!("{TOPIC_ROOT}/{}/cfgack", self.node_id)
    }

    /// Connection topic for this agent's edge type
    pub fn conn_topic(&self) -> String {
        match self.edge_type {
            EdgeType::Gateway => self.node_conn_topic(),
            EdgeType::Device => self.device_conn_topic(),
        }
    }

    /// Command topic for this agent's edge type
    pub fn cmd_topic(&self) -> String {
        match self.edge_type {
            EdgeType::Gateway => self.node_cmd_topic(),
            EdgeType::Device => self.device_cmd_topic(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_gateway_topics() {
        let topics = TopicBuilder::new("node1", "", EdgeType::Gateway);
        assert_eq!(topics.config_topic(), "/wisepaas/scada/node1/cfg");
        assert_eq!(topics.data_topic(), "/wisepaas/scada/node1/data");
        assert_eq!(topics.conn_topic(), "/wisepaas/scada/node1/conn");
        assert_eq!(topics.cmd_topic(), "/wisepaas/scada/node1/cmd");
        assert_eq!(topics.ack_topic(), "/wisepaas/scada/node1/ack");
        assert_eq!(topics.cfg_ack_topic(), "/wisepaas/scada/node1/cfgack");
    }

    #[test]
    fn test_device_topics() {
        let topics = TopicBuilder::new("node1", "dev7", EdgeType::Device);
        assert_eq!(topics.conn_topic(), "/wisepaas/scada/node1/dev7/conn");
        assert_eq!(topics.cmd_topic(), "/wisepaas/scada/node1/dev7/cmd");
        // Ack and data stay at node level
        assert_eq!(topics.ack_topic(), "/wisepaas/scada/node1/ack");
        assert_eq!(topics.data_topic(), "/wisepaas/scada/node1/data");
        assert_eq!(topics.node_conn_topic(), "/wisepaas/scada/node1/conn");
    }

    proptest! {
        #[test]
        fn topics_are_rooted_under_node(node in "[a-zA-Z0-9_-]{1,32}", device in "[a-zA-Z0-9_-]{1,32}") {
            let topics = TopicBuilder::new(node.clone(), device, EdgeType::Device);
            let prefix = format!("/wisepaas/scada/{node}/");
            for topic in [topics.config_topic(), topics.data_topic(), topics.conn_topic(), topics.cmd_topic(), topics.ack_topic()] {
                prop_assert!(topic.starts_with(&prefix), "{} not under {}", topic, prefix);
                prop_assert!(!topic.contains("//"));
            }
        }
    }
}
