//! Pure routing of rumqttc events

use rumqttc::v5::mqttbytes::v5::{Packet, PubAckReason, PubCompReason, PubRecReason};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Routing decisions for MQTT events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Final acknowledgement of one of our publishes (PubAck or PubComp)
    PublishAcknowledged { packet_id: u16 },
    /// Broker refused one of our publishes with a failure reason code
    PublishRejected { packet_id: u16, reason: String },
    /// A QoS 1/2 publish left the client under this packet id
    PublishSent { packet_id: u16 },
    /// MQTT broker disconnected
    Disconnected,
    /// Infrastructure event (PingResp, SubAck, PubRec, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

pub struct MessageHandler;

impl MessageHandler {
    /// Route MQTT event to appropriate handler (pure routing decision)
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                },
                Packet::PubAck(puback) => match puback.reason {
                    PubAckReason::Success | PubAckReason::NoMatchingSubscribers => {
                        EventRoute::PublishAcknowledged {
                            packet_id: puback.pkid,
                        }
                    }
                    reason => EventRoute::PublishRejected {
                        packet_id: puback.pkid,
                        reason: format!("{reason:?}"),
                    },
                },
                Packet::PubRec(pubrec)
                    if !matches!(
                        pubrec.reason,
                        PubRecReason::Success | PubRecReason::NoMatchingSubscribers
                    ) =>
                {
                    EventRoute::PublishRejected {
                        packet_id: pubrec.pkid,
                        reason: format!("{:?}", pubrec.reason),
                    }
                }
                Packet::PubComp(pubcomp) => match pubcomp.reason {
                    PubCompReason::Success => EventRoute::PublishAcknowledged {
                        packet_id: pubcomp.pkid,
                    },
                    reason => EventRoute::PublishRejected {
                        packet_id: pubcomp.pkid,
                        reason: format!("{reason:?}"),
                    },
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Publish(packet_id)) if *packet_id != 0 => {
                EventRoute::PublishSent {
                    packet_id: *packet_id,
                }
            }
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{
        ConnAck, ConnectReturnCode, Disconnect, DisconnectReasonCode, PubAck, PubComp, PubRec,
        Publish,
    };
    use rumqttc::v5::mqttbytes::QoS;

    #[test]
    fn test_route_connack() {
        let connack = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&connack),
            EventRoute::ConnectionAcknowledged
        );
    }

    #[test]
    fn test_route_disconnect() {
        let disconnect = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&disconnect),
            EventRoute::Disconnected
        );
    }

    #[test]
    fn test_route_publish() {
        let publish = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtLeastOnce,
            retain: false,
            topic: Bytes::from("/wisepaas/scada/n1/cmd"),
            pkid: 1,
            payload: Bytes::from(r#"{"d":{"Cmd":"TSyn","UTC":0}}"#),
            properties: None,
        }));

        assert_eq!(
            MessageHandler::route_mqtt_event(&publish),
            EventRoute::MessageReceived {
                topic: "/wisepaas/scada/n1/cmd".to_string(),
                payload: br#"{"d":{"Cmd":"TSyn","UTC":0}}"#.to_vec(),
            }
        );
    }

    #[test]
    fn test_route_puback() {
        let puback = Event::Incoming(Packet::PubAck(PubAck {
            pkid: 7,
            reason: PubAckReason::Success,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&puback),
            EventRoute::PublishAcknowledged { packet_id: 7 }
        );
    }

    #[test]
    fn test_route_no_matching_subscribers_is_delivered() {
        let puback = Event::Incoming(Packet::PubAck(PubAck {
            pkid: 3,
            reason: PubAckReason::NoMatchingSubscribers,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&puback),
            EventRoute::PublishAcknowledged { packet_id: 3 }
        );
    }

    #[test]
    fn test_route_rejected_puback() {
        let puback = Event::Incoming(Packet::PubAck(PubAck {
            pkid: 7,
            reason: PubAckReason::QuotaExceeded,
            properties: None,
        }));
        assert_eq!(
            MessageHandler::route_mqtt_event(&puback),
            EventRoute::PublishRejected {
                packet_id: 7,
                reason: "QuotaExceeded".to_string(),
            }
        );
    }

    #[test]
    fn test_route_rejected_qos2_handshake() {
        let pubrec = Event::Incoming(Packet::PubRec(PubRec {
            pkid: 8,
            reason: PubRecReason::NotAuthorized,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&pubrec),
            EventRoute::PublishRejected { packet_id: 8, .. }
        ));

        let pubcomp = Event::Incoming(Packet::PubComp(PubComp {
            pkid: 8,
            reason: PubCompReason::PacketIdentifierNotFound,
            properties: None,
        }));
        assert!(matches!(
            MessageHandler::route_mqtt_event(&pubcomp),
            EventRoute::PublishRejected { packet_id: 8, .. }
        ));
    }

    #[test]
    fn test_route_outgoing_publish_carries_packet_id() {
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Publish(12))),
            EventRoute::PublishSent { packet_id: 12 }
        );
        assert_eq!(
            MessageHandler::route_mqtt_event(&Event::Outgoing(Outgoing::Publish(0))),
            EventRoute::OutgoingEvent
        );
    }
}
