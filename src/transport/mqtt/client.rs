//! Impure I/O operations for the MQTT client
//!
//! Owns the rumqttc `AsyncClient` and the task polling its `EventLoop`.
//! Publishes are serialized: the client lock is held until the broker has
//! answered the publish. The waiting publish is bound to the packet id
//! rumqttc assigns when the packet leaves, and only an answer carrying that
//! id settles it.

use super::connection::{configure_mqtt_options, to_mqtt_qos, LinkState};
use super::message_handler::{EventRoute, MessageHandler};
use crate::transport::{ConnectOptions, QoS, Transport, TransportError, TransportEvent};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Grace period for the event loop to flush DISCONNECT before it is aborted
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type AckOutcome = Result<(), TransportError>;

struct PendingPublish {
    packet_id: Option<u16>,
    waiter: oneshot::Sender<AckOutcome>,
}

/// Slot for the one QoS 1/2 publish awaiting the broker's answer
#[derive(Clone, Default)]
struct AckTracker {
    pending: Arc<Mutex<Option<PendingPublish>>>,
}

impl AckTracker {
    async fn register(&self) -> oneshot::Receiver<AckOutcome> {
        let (waiter, rx) = oneshot::channel();
        *self.pending.lock().await = Some(PendingPublish {
            packet_id: None,
            waiter,
        });
        rx
    }

    /// Attach the id of the packet that just left to the unbound waiter
    async fn bind(&self, packet_id: u16) {
        if let Some(pending) = self.pending.lock().await.as_mut() {
            if pending.packet_id.is_none() {
                pending.packet_id = Some(packet_id);
            }
        }
    }

    /// Resolve the waiter if it owns `packet_id`; returns whether it did
    async fn settle(&self, packet_id: u16, outcome: AckOutcome) -> bool {
        let mut pending = self.pending.lock().await;
        if pending.as_ref().and_then(|p| p.packet_id) != Some(packet_id) {
            return false;
        }
        if let Some(pending) = pending.take() {
            let _ = pending.waiter.send(outcome);
        }
        true
    }

    /// Drop the waiter; its publish fails if it is still waiting
    async fn abandon(&self) {
        self.pending.lock().await.take();
    }
}

struct ActiveClient {
    client: AsyncClient,
    publish_timeout: Duration,
}

/// MQTT v5 transport over rumqttc
pub struct MqttTransport {
    client: Mutex<Option<ActiveClient>>,
    state: Arc<watch::Sender<LinkState>>,
    acks: AckTracker,
    closing: Arc<AtomicBool>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    pub fn new() -> Self {
        let (state, _) = watch::channel(LinkState::Closed("not connected".to_string()));
        Self {
            client: Mutex::new(None),
            state: Arc::new(state),
            acks: AckTracker::default(),
            closing: Arc::new(AtomicBool::new(false)),
            event_loop_handle: Mutex::new(None),
        }
    }

    /// Current link state
    pub fn link_state(&self) -> LinkState {
        self.state.borrow().clone()
    }

    /// Wait for connection confirmation (ConnAck) with timeout
    async fn wait_for_connection_confirmation(
        mut state_rx: watch::Receiver<LinkState>,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        let confirmation = tokio::time::timeout(timeout, async {
            loop {
                match &*state_rx.borrow_and_update() {
                    LinkState::Connected => return Ok(()),
                    LinkState::Closed(reason) => {
                        return Err(TransportError::ConnectionFailed(reason.clone()));
                    }
                    LinkState::Connecting => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(TransportError::ConnectionFailed(
                        "State channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match confirmation {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        }
    }

    /// Drive the rumqttc event loop until the link closes
    async fn run_event_loop(
        mut event_loop: EventLoop,
        state: Arc<watch::Sender<LinkState>>,
        acks: AckTracker,
        closing: Arc<AtomicBool>,
        events: mpsc::Sender<TransportEvent>,
    ) {
        loop {
            let reason = match event_loop.poll().await {
                Ok(event) => match MessageHandler::route_mqtt_event(&event) {
                    EventRoute::ConnectionAcknowledged => {
                        state.send_replace(LinkState::Connected);
                        info!("MQTT connection acknowledged");
                        continue;
                    }
                    EventRoute::MessageReceived { topic, payload } => {
                        debug!(target: "mqtt_transport", topic = %topic, "Received MQTT message");
                        if events
                            .send(TransportEvent::Message { topic, payload })
                            .await
                            .is_err()
                        {
                            debug!(target: "mqtt_transport", "Event receiver dropped, message discarded");
                        }
                        continue;
                    }
                    EventRoute::PublishSent { packet_id } => {
                        acks.bind(packet_id).await;
                        continue;
                    }
                    EventRoute::PublishAcknowledged { packet_id } => {
                        if acks.settle(packet_id, Ok(())).await {
                            debug!(target: "mqtt_transport", packet_id, "Publish acknowledged");
                        } else {
                            debug!(target: "mqtt_transport", packet_id, "Ignoring acknowledgement of an abandoned publish");
                        }
                        continue;
                    }
                    EventRoute::PublishRejected { packet_id, reason } => {
                        warn!(packet_id, reason = %reason, "Broker rejected publish");
                        acks.settle(
                            packet_id,
                            Err(TransportError::PublishFailed(format!(
                                "rejected by broker: {reason}"
                            ))),
                        )
                        .await;
                        continue;
                    }
                    EventRoute::InfrastructureEvent(event_str) => {
                        debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
                        continue;
                    }
                    EventRoute::OutgoingEvent => continue,
                    EventRoute::Disconnected => "Disconnected by broker".to_string(),
                },
                Err(e) => e.to_string(),
            };

            let was_connected = state.borrow().is_connected();
            state.send_replace(LinkState::Closed(reason.clone()));
            // Dropping the waiter fails the in-flight publish
            acks.abandon().await;

            if closing.load(Ordering::SeqCst) {
                debug!(target: "mqtt_transport", "Event loop finished after disconnect: {}", reason);
            } else if was_connected {
                warn!(reason = %reason, "MQTT connection lost");
                let _ = events.send(TransportEvent::ConnectionLost(reason)).await;
            } else {
                error!(reason = %reason, "MQTT connection attempt failed");
            }
            break;
        }
    }

    /// Stop the event loop without reporting a loss
    async fn shutdown_link(&self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(handle) = self.event_loop_handle.lock().await.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.client.lock().await.take();
        self.acks.abandon().await;
        if !matches!(*self.state.borrow(), LinkState::Closed(_)) {
            self.state
                .send_replace(LinkState::Closed("connection closed".to_string()));
        }
    }
}

impl Default for MqttTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(
        &self,
        options: &ConnectOptions,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError> {
        self.shutdown_link().await;

        let mqtt_options = configure_mqtt_options(options);
        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);

        self.closing.store(false, Ordering::SeqCst);
        self.state.send_replace(LinkState::Connecting);
        let state_rx = self.state.subscribe();

        info!(
            host = %options.host,
            port = options.port,
            protocol = options.protocol.scheme(),
            client_id = %options.client_id,
            "Connecting to MQTT broker"
        );

        let handle = tokio::spawn(Self::run_event_loop(
            event_loop,
            self.state.clone(),
            self.acks.clone(),
            self.closing.clone(),
            events,
        ));
        *self.event_loop_handle.lock().await = Some(handle);
        *self.client.lock().await = Some(ActiveClient {
            client,
            publish_timeout: options.publish_timeout,
        });

        if let Err(e) =
            Self::wait_for_connection_confirmation(state_rx, options.connect_timeout).await
        {
            self.shutdown_link().await;
            return Err(e);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.closing.store(true, Ordering::SeqCst);

        // Waits for an in-flight publish to settle
        let Some(active) = self.client.lock().await.take() else {
            return Ok(());
        };
        if let Err(e) = active.client.disconnect().await {
            debug!(target: "mqtt_transport", "Disconnect request not delivered: {}", e);
        }

        if let Some(mut handle) = self.event_loop_handle.lock().await.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await {
                Ok(Ok(())) => debug!(target: "mqtt_transport", "Event loop task shut down gracefully"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Event loop task ended with error: {}", e);
                }
                Ok(Err(_)) => {}
                Err(_) => {
                    warn!("Event loop task didn't shut down gracefully, forcing abort");
                    handle.abort();
                }
            }
        }

        self.acks.abandon().await;
        self.state
            .send_replace(LinkState::Closed("client disconnected".to_string()));
        info!("MQTT client disconnected");
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        let guard = self.client.lock().await;
        let Some(active) = guard.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        if qos == QoS::AtMostOnce {
            return active
                .client
                .publish(topic, to_mqtt_qos(qos), retain, payload)
                .await
                .map_err(|e| TransportError::PublishFailed(e.to_string()));
        }

        let ack_rx = self.acks.register().await;
        if !self.is_connected() {
            self.acks.abandon().await;
            return Err(TransportError::NotConnected);
        }

        if let Err(e) = active
            .client
            .publish(topic, to_mqtt_qos(qos), retain, payload)
            .await
        {
            self.acks.abandon().await;
            return Err(TransportError::PublishFailed(e.to_string()));
        }

        match tokio::time::timeout(active.publish_timeout, ack_rx).await {
            Ok(Ok(Ok(()))) => {
                debug!(target: "mqtt_transport", topic = %topic, "Publish confirmed");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(TransportError::PublishFailed(
                "connection closed before acknowledgement".to_string(),
            )),
            Err(_) => {
                self.acks.abandon().await;
                Err(TransportError::Timeout)
            }
        }
    }

    async fn subscribe(&self, topic: &str, qos: QoS) -> Result<(), TransportError> {
        let guard = self.client.lock().await;
        let Some(active) = guard.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        active
            .client
            .subscribe(topic, to_mqtt_qos(qos))
            .await
            .map_err(|e| TransportError::SubscriptionFailed(e.to_string()))?;
        debug!(target: "mqtt_transport", topic = %topic, "Subscribed");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.event_loop_handle.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Protocol;

    fn unreachable_options() -> ConnectOptions {
        ConnectOptions {
            host: "127.0.0.1".to_string(),
            port: 1,
            protocol: Protocol::Tcp,
            username: String::new(),
            password: String::new(),
            client_id: "EdgeAgent_test".to_string(),
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(2),
            publish_timeout: Duration::from_secs(1),
            will: None,
        }
    }

    #[tokio::test]
    async fn test_new_transport_is_disconnected() {
        let transport = MqttTransport::new();
        assert!(!transport.is_connected());
        assert!(matches!(transport.link_state(), LinkState::Closed(_)));
    }

    #[tokio::test]
    async fn test_publish_without_connection_fails() {
        let transport = MqttTransport::new();
        let result = transport
            .publish("/t", b"x".to_vec(), QoS::AtLeastOnce, false)
            .await;
        assert_eq!(result, Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn test_disconnect_without_connection_is_noop() {
        let transport = MqttTransport::new();
        assert!(transport.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails_without_loss_event() {
        let transport = MqttTransport::new();
        let (tx, mut rx) = mpsc::channel(10);

        let result = transport.connect(&unreachable_options(), tx).await;

        assert!(result.is_err());
        assert!(!transport.is_connected());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_wait_for_confirmation_times_out() {
        let (state, _) = watch::channel(LinkState::Connecting);
        let result = MqttTransport::wait_for_connection_confirmation(
            state.subscribe(),
            Duration::from_millis(50),
        )
        .await;
        assert_eq!(result, Err(TransportError::Timeout));
    }

    #[tokio::test]
    async fn test_wait_for_confirmation_reports_close_reason() {
        let (state, _) = watch::channel(LinkState::Connecting);
        let rx = state.subscribe();
        state.send_replace(LinkState::Closed("refused".to_string()));
        let result =
            MqttTransport::wait_for_connection_confirmation(rx, Duration::from_secs(1)).await;
        assert_eq!(
            result,
            Err(TransportError::ConnectionFailed("refused".to_string()))
        );
    }

    #[tokio::test]
    async fn test_rejected_publish_fails_its_waiter() {
        let acks = AckTracker::default();
        let rx = acks.register().await;
        acks.bind(4).await;

        let rejection = TransportError::PublishFailed("rejected by broker: QuotaExceeded".into());
        assert!(acks.settle(4, Err(rejection.clone())).await);
        assert_eq!(rx.await.unwrap(), Err(rejection));
    }

    #[tokio::test]
    async fn test_late_ack_does_not_confirm_next_publish() {
        let acks = AckTracker::default();

        // First publish goes out as packet 1 and times out
        let _first = acks.register().await;
        acks.bind(1).await;
        acks.abandon().await;

        let mut second = acks.register().await;
        acks.bind(2).await;

        assert!(!acks.settle(1, Ok(())).await);
        assert!(second.try_recv().is_err());

        assert!(acks.settle(2, Ok(())).await);
        assert_eq!(second.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_ack_before_packet_leaves_is_ignored() {
        let acks = AckTracker::default();
        let mut rx = acks.register().await;

        assert!(!acks.settle(9, Ok(())).await);
        assert!(rx.try_recv().is_err());

        acks.bind(9).await;
        acks.bind(10).await;
        assert!(acks.settle(9, Ok(())).await);
        assert_eq!(rx.await.unwrap(), Ok(()));
    }
}
