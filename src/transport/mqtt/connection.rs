//! Pure connection configuration for the MQTT client
//!
//! Maps [`ConnectOptions`] onto rumqttc's MQTT v5 options and tracks the
//! link state reported by the event loop.

use crate::config::Protocol;
use crate::transport::{ConnectOptions, QoS};
use rumqttc::v5::mqttbytes::v5::LastWill;
use rumqttc::v5::{mqttbytes::QoS as MqttQoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;

/// Link state published by the event loop task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// Waiting for ConnAck
    Connecting,
    Connected,
    /// Link is gone, with the reason
    Closed(String),
}

impl LinkState {
    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

pub fn to_mqtt_qos(qos: QoS) -> MqttQoS {
    match qos {
        QoS::AtMostOnce => MqttQoS::AtMostOnce,
        QoS::AtLeastOnce => MqttQoS::AtLeastOnce,
        QoS::ExactlyOnce => MqttQoS::ExactlyOnce,
    }
}

/// Broker address as rumqttc expects it for the chosen protocol
pub fn broker_address(options: &ConnectOptions) -> String {
    match options.protocol {
        Protocol::Websocket => format!(
            "{}://{}:{}",
            options.protocol.scheme(),
            options.host,
            options.port
        ),
        Protocol::Tcp | Protocol::Tls => options.host.clone(),
    }
}

/// Pure function to configure MQTT options for one connection attempt
pub fn configure_mqtt_options(options: &ConnectOptions) -> MqttOptions {
    let mut mqtt_options =
        MqttOptions::new(&options.client_id, broker_address(options), options.port);

    match options.protocol {
        Protocol::Tcp => {}
        Protocol::Tls => {
            mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
        }
        Protocol::Websocket => {
            mqtt_options.set_transport(RumqttcTransport::Ws);
        }
    }

    if !options.username.is_empty() {
        mqtt_options.set_credentials(&options.username, &options.password);
    }

    mqtt_options.set_keep_alive(options.keep_alive.max(Duration::from_secs(1)));
    // Keep the broker-side session across reconnects
    mqtt_options.set_clean_start(false);
    mqtt_options.set_max_packet_size(Some(256 * 1024));

    if let Some(will) = &options.will {
        let lwt = LastWill::new(
            will.topic.clone(),
            will.payload.clone(),
            to_mqtt_qos(will.qos),
            will.retain,
            None,
        );
        mqtt_options.set_last_will(lwt);
    }

    mqtt_options
}
