//! Session lifecycle against the broker
//!
//! The [`SessionManager`] is the only owner of the transport and the only
//! writer of the session state. Connect, disconnect and every reconnect
//! attempt run under one lifecycle lock, so attempts never overlap.
//! Spawned tasks (inbound pump, reconnect loop, schedulers) hold a weak
//! reference and end on their own once the manager is dropped.

use super::credentials::{BrokerCredentials, CredentialProvider};
use super::message_handler::InboundDecoder;
use super::scheduler::{drain_once, PeriodicTask};
use super::state::{SessionState, Transition};
use crate::config::{AgentConfig, ConfigError, ConnectType};
use crate::error::AgentResult;
use crate::protocol::edge::MessageReceived;
use crate::protocol::messages::{connect_message, disconnect_message, heartbeat_message, will_message};
use crate::protocol::topics::TopicBuilder;
use crate::queue::OfflineQueue;
use crate::session_span;
use crate::transport::{
    ConnectOptions, QoS, Transport, TransportError, TransportEvent, WillMessage,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSPORT_EVENT_BUFFER: usize = 100;

/// Notifications for the agent's handlers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    MessageReceived(MessageReceived),
}

impl SessionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEvent::Connected => "connected",
            SessionEvent::Disconnected => "disconnected",
            SessionEvent::MessageReceived(_) => "message_received",
        }
    }
}

pub struct SessionManager<T: Transport> {
    inner: Arc<SessionInner<T>>,
}

struct SessionInner<T: Transport> {
    config: AgentConfig,
    topics: TopicBuilder,
    decoder: InboundDecoder,
    client_id: String,
    transport: Arc<T>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    queue: Arc<OfflineQueue>,
    state: watch::Sender<SessionState>,
    lifecycle: Mutex<Lifecycle>,
    notifications: mpsc::Sender<SessionEvent>,
}

#[derive(Default)]
struct Lifecycle {
    pump: Option<JoinHandle<()>>,
    reconnect: Option<Reconnect>,
    schedulers: Vec<PeriodicTask>,
}

struct Reconnect {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl<T: Transport> SessionManager<T> {
    /// `credentials` is consulted before every attempt when the agent uses
    /// DCCS; it is ignored for plain MQTT.
    pub fn new(
        config: AgentConfig,
        transport: Arc<T>,
        credentials: Option<Arc<dyn CredentialProvider>>,
        queue: Arc<OfflineQueue>,
        notifications: mpsc::Sender<SessionEvent>,
    ) -> Self {
        let topics = TopicBuilder::from_section(&config.agent);
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            inner: Arc::new(SessionInner {
                decoder: InboundDecoder::new(&topics),
                topics,
                client_id: format!("EdgeAgent_{}", Uuid::new_v4()),
                config,
                transport,
                credentials,
                queue,
                state,
                lifecycle: Mutex::new(Lifecycle::default()),
                notifications,
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch state changes
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn topics(&self) -> &TopicBuilder {
        &self.inner.topics
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.inner.transport
    }

    /// Connect, subscribe, announce and start the schedulers
    ///
    /// A no-op when already connected. A pending reconnect loop is replaced
    /// by this attempt.
    pub async fn connect(&self) -> AgentResult<()> {
        let inner = &self.inner;
        let mut lifecycle = inner.lifecycle.lock().await;
        if inner.is_connected() {
            debug!("Connect requested while already connected");
            return Ok(());
        }
        cancel_reconnect(&mut lifecycle).await;

        let span = session_span!(node_id = %inner.topics.node_id(), attempt = "connect");
        inner.establish(&mut lifecycle).instrument(span).await
    }

    /// Announce the disconnect and tear the session down
    ///
    /// Idempotent. Stops a pending reconnect loop even when the session is
    /// already down.
    pub async fn disconnect(&self) {
        self.inner.shutdown().await;
    }

    /// Publish on the current session and wait for the broker's ack
    pub async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        self.inner.publish(topic, payload, qos, retain).await
    }
}

impl<T: Transport> Clone for SessionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> SessionInner<T> {
    fn is_connected(&self) -> bool {
        self.state.borrow().is_connected()
    }

    fn apply(&self, transition: Transition) -> SessionState {
        let previous = *self.state.borrow();
        let next = previous.next(&transition);
        self.state.send_replace(next);
        previous
    }

    async fn notify(&self, event: SessionEvent) {
        if self.notifications.send(event).await.is_err() {
            debug!("Notification receiver dropped");
        }
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    ) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.transport.publish(topic, payload, qos, retain).await
    }

    /// Resolve broker options for one attempt, refreshing DCCS credentials
    async fn connect_options(&self) -> AgentResult<ConnectOptions> {
        let broker = match self.config.agent.connect_type {
            ConnectType::Dccs => {
                self.config.dccs_options()?;
                let provider = self
                    .credentials
                    .as_ref()
                    .ok_or(ConfigError::InvalidDccsOptions)?;
                provider.fetch().await?
            }
            ConnectType::Mqtt => {
                let mqtt = &self.config.mqtt;
                if !mqtt.is_valid() {
                    return Err(ConfigError::InvalidMqttOptions.into());
                }
                BrokerCredentials {
                    host: mqtt.host_name.clone(),
                    port: mqtt.port,
                    username: mqtt.resolved_username(),
                    password: mqtt.resolved_password(),
                    protocol: mqtt.protocol,
                }
            }
        };

        let will = will_message()
            .to_payload()
            .map_err(|e| TransportError::ConnectionFailed(format!("will payload: {e}")))?;

        Ok(ConnectOptions {
            host: broker.host,
            port: broker.port,
            protocol: broker.protocol,
            username: broker.username,
            password: broker.password,
            client_id: self.client_id.clone(),
            keep_alive: Duration::from_secs(self.config.mqtt.keep_alive_secs),
            connect_timeout: CONNECT_TIMEOUT,
            publish_timeout: self.config.publish_timeout(),
            will: Some(WillMessage {
                topic: self.topics.node_conn_topic(),
                payload: will,
                qos: QoS::AtLeastOnce,
                retain: true,
            }),
        })
    }

    /// One full connect attempt; state ends Connected or Disconnected
    async fn establish(self: &Arc<Self>, lifecycle: &mut Lifecycle) -> AgentResult<()> {
        self.apply(Transition::ConnectStarted);
        match self.try_establish(lifecycle).await {
            Ok(()) => {
                self.apply(Transition::ConnectSucceeded);
                self.after_connect(lifecycle).await;
                Ok(())
            }
            Err(e) => {
                self.apply(Transition::ConnectFailed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn try_establish(self: &Arc<Self>, lifecycle: &mut Lifecycle) -> AgentResult<()> {
        let options = self.connect_options().await?;
        info!(
            host = %options.host,
            port = options.port,
            client_id = %options.client_id,
            "Connecting to broker"
        );

        let (events_tx, events_rx) = mpsc::channel(TRANSPORT_EVENT_BUFFER);
        self.transport.connect(&options, events_tx).await?;

        for topic in [self.topics.cmd_topic(), self.topics.ack_topic()] {
            if let Err(e) = self.transport.subscribe(&topic, QoS::AtLeastOnce).await {
                if let Err(close_err) = self.transport.disconnect().await {
                    debug!("Transport close after failed subscribe: {}", close_err);
                }
                return Err(e.into());
            }
        }

        if let Some(old) = lifecycle.pump.take() {
            old.abort();
        }
        lifecycle.pump = Some(tokio::spawn(Self::run_pump(
            Arc::downgrade(self),
            events_rx,
        )));
        Ok(())
    }

    /// Announce the connection, ensure the schedulers, notify handlers
    async fn after_connect(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        match connect_message().to_payload() {
            Ok(payload) => {
                if let Err(e) = self
                    .publish(&self.topics.conn_topic(), payload, QoS::AtLeastOnce, true)
                    .await
                {
                    warn!(error = %e, "Failed to publish connect message");
                }
            }
            Err(e) => error!(error = %e, "Failed to encode connect message"),
        }

        if lifecycle.schedulers.is_empty() {
            lifecycle.schedulers = self.start_schedulers();
        }

        self.notify(SessionEvent::Connected).await;
    }

    fn start_schedulers(self: &Arc<Self>) -> Vec<PeriodicTask> {
        let mut tasks = Vec::new();

        if let Some(period) = self.config.heartbeat_interval() {
            let weak = Arc::downgrade(self);
            tasks.push(PeriodicTask::spawn("heartbeat", period, move || {
                let weak = weak.clone();
                async move {
                    if let Some(inner) = weak.upgrade() {
                        inner.heartbeat_tick().await;
                    }
                }
            }));
        }

        if self.config.agent.data_recover {
            let weak = Arc::downgrade(self);
            tasks.push(PeriodicTask::spawn(
                "recovery",
                self.config.recover_interval(),
                move || {
                    let weak = weak.clone();
                    async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.recovery_tick().await;
                        }
                    }
                },
            ));
        }

        info!(tasks = tasks.len(), "Session schedulers started");
        tasks
    }

    async fn heartbeat_tick(&self) {
        if !self.is_connected() {
            return;
        }
        let payload = match heartbeat_message().to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "Failed to encode heartbeat");
                return;
            }
        };
        match self
            .publish(&self.topics.conn_topic(), payload, QoS::AtLeastOnce, true)
            .await
        {
            Ok(()) => debug!("Heartbeat published"),
            Err(e) => warn!(error = %e, "Heartbeat publish failed"),
        }
    }

    async fn recovery_tick(&self) {
        if !self.is_connected() {
            return;
        }
        let topic = self.topics.data_topic();
        let report = drain_once(
            &self.queue,
            self.config.storage.recover_batch_size,
            |message| {
                let topic = topic.clone();
                async move {
                    self.publish(&topic, message.into_bytes(), QoS::AtLeastOnce, false)
                        .await
                        .is_ok()
                }
            },
        )
        .await;

        if report.delivered > 0 {
            info!(
                delivered = report.delivered,
                requeued = report.requeued,
                "Recovered queued data"
            );
        }
    }

    /// Forward inbound messages and react to a lost connection
    async fn run_pump(weak: Weak<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match event {
                TransportEvent::Message { topic, payload } => {
                    match inner.decoder.decode(&topic, &payload) {
                        Ok(Some(message)) => {
                            inner.notify(SessionEvent::MessageReceived(message)).await;
                        }
                        Ok(None) => debug!(topic = %topic, "Ignoring inbound message"),
                        Err(e) => warn!(topic = %topic, error = %e, "Discarding malformed message"),
                    }
                }
                TransportEvent::ConnectionLost(reason) => {
                    inner.handle_connection_lost(reason).await;
                    return;
                }
            }
        }
    }

    async fn handle_connection_lost(self: &Arc<Self>, reason: String) {
        let mut lifecycle = self.lifecycle.lock().await;
        if !self.is_connected() {
            // A disconnect got here first
            return;
        }
        let previous = self.apply(Transition::ConnectionLost(reason));
        // This task is the pump; dropping its handle detaches it
        lifecycle.pump = None;

        if previous.leaves_connected(*self.state.borrow()) {
            self.notify(SessionEvent::Disconnected).await;
        }

        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(Self::run_reconnect(Arc::downgrade(self), stop_rx));
        lifecycle.reconnect = Some(Reconnect { stop, handle });
    }

    /// Retry until connected or stopped
    ///
    /// Boxed so the reconnect, pump and connect futures do not form a
    /// cycle of opaque types.
    fn run_reconnect(
        weak: Weak<Self>,
        mut stop: watch::Receiver<bool>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            let mut attempt: u32 = 0;
            loop {
                let interval = match weak.upgrade() {
                    Some(inner) => inner.config.reconnect_interval(),
                    None => return,
                };
                tokio::select! {
                    biased;
                    _ = stop.changed() => return,
                    _ = tokio::time::sleep(interval) => {}
                }

                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let mut lifecycle = inner.lifecycle.lock().await;
                if *stop.borrow() || inner.is_connected() {
                    return;
                }

                attempt += 1;
                let span = session_span!(node_id = %inner.topics.node_id(), attempt = attempt);
                match inner.establish(&mut lifecycle).instrument(span).await {
                    Ok(()) => {
                        info!(attempt, "Reconnected to broker");
                        lifecycle.reconnect = None;
                        return;
                    }
                    Err(e) => {
                        warn!(attempt, error = %e, "Reconnect attempt failed");
                    }
                }
            }
        })
    }

    async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        cancel_reconnect(&mut lifecycle).await;

        for task in lifecycle.schedulers.drain(..) {
            task.stop().await;
        }

        let was_connected = self.is_connected();
        if was_connected {
            match disconnect_message().to_payload() {
                Ok(payload) => {
                    if let Err(e) = self
                        .publish(&self.topics.conn_topic(), payload, QoS::AtLeastOnce, true)
                        .await
                    {
                        warn!(error = %e, "Failed to publish disconnect message");
                    }
                }
                Err(e) => error!(error = %e, "Failed to encode disconnect message"),
            }
        }

        self.apply(Transition::DisconnectRequested);

        if let Some(pump) = lifecycle.pump.take() {
            pump.abort();
            let _ = pump.await;
        }
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Transport disconnect failed");
        }

        if was_connected {
            info!("Session disconnected");
            self.notify(SessionEvent::Disconnected).await;
        }
    }
}

async fn cancel_reconnect(lifecycle: &mut Lifecycle) {
    if let Some(reconnect) = lifecycle.reconnect.take() {
        reconnect.stop.send_replace(true);
        reconnect.handle.abort();
        let _ = reconnect.handle.await;
    }
}
