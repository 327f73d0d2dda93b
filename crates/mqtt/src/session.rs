//! Broker session: connect/backoff state machine, lifecycle publishes and
//! inbound routing. Driven by a non-blocking `tick` from the control loop.

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use ledc_core::{TopicKind, Topics};

use crate::config::MqttConfig;
use crate::transport::{ConnectRequest, DisconnectReason, LastWill, Transport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    BackingOff,
    Connected,
}

/// Outcome of one `tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Connected,
    ConnectFailed(DisconnectReason),
    BackingOff,
    ConnectionLost,
}

/// Whether a handler hook accepted a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    NoHandler,
    /// The hook ran but the document failed validation.
    Rejected,
}

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("zero-length payload")]
    ZeroLength,
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
    #[error("unroutable topic {0}")]
    UnroutableTopic(String),
    #[error("no handler for {0} messages")]
    NoHandler(TopicKind),
    #[error("invalid {0} document")]
    InvalidDocument(TopicKind),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("not connected")]
    NotConnected,
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The publishing side of a session, handed to hooks.
pub trait Publisher {
    fn topics(&self) -> &Topics;

    fn is_connected(&self) -> bool;

    /// Refused with [`PublishError::NotConnected`] unless connected.
    fn publish(&mut self, topic: &str, doc: &Value, retain: bool) -> Result<(), PublishError>;

    fn subscribe(&mut self, topic: &str) -> Result<(), PublishError>;

    /// Publish on the canonical topic for `kind`; stat/adopt/lwt are retained, tele is not.
    fn publish_kind(&mut self, kind: TopicKind, doc: &Value) -> Result<(), PublishError> {
        let topic = self.topics().topic(kind);
        self.publish(&topic, doc, kind.retained())
    }
}

/// Callbacks the session invokes. A hook left at its default reports
/// [`Dispatch::NoHandler`].
pub trait SessionHandler {
    fn on_connected(&mut self, _session: &mut dyn Publisher) {}

    fn on_disconnected(&mut self, _reason: DisconnectReason) {}

    fn on_config(&mut self, _doc: &Value) -> Dispatch {
        Dispatch::NoHandler
    }

    fn on_command(&mut self, _doc: &Value) -> Dispatch {
        Dispatch::NoHandler
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub received: u64,
    pub malformed: u64,
    pub unroutable: u64,
    pub unhandled: u64,
    pub rejected: u64,
    pub published: u64,
    pub connects: u64,
    pub connect_failures: u64,
}

pub struct Session<T> {
    transport: T,
    config: MqttConfig,
    topics: Topics,
    state: ConnectionState,
    backoff: u32,
    last_attempt_ms: u64,
    connected_at_ms: Option<u64>,
    stats: SessionStats,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: MqttConfig) -> Self {
        let topics = Topics::new(&config.topic_prefix, &config.client_id, &config.topic_suffix);
        Self {
            transport,
            config,
            topics,
            state: ConnectionState::Disconnected,
            backoff: 0,
            last_attempt_ms: 0,
            connected_at_ms: None,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState { self.state }
    pub fn backoff(&self) -> u32 { self.backoff }
    pub fn stats(&self) -> SessionStats { self.stats }
    pub fn config(&self) -> &MqttConfig { &self.config }
    pub fn transport(&self) -> &T { &self.transport }
    pub fn transport_mut(&mut self) -> &mut T { &mut self.transport }
    pub fn connected_at_ms(&self) -> Option<u64> { self.connected_at_ms }

    /// One non-blocking pass of the state machine. Inbound messages are
    /// routed to `handler` before this returns.
    pub fn tick(&mut self, now_ms: u64, handler: &mut dyn SessionHandler) -> TickStatus {
        match self.state {
            ConnectionState::Disconnected => self.attempt(now_ms, handler),
            ConnectionState::BackingOff => {
                let wait = u64::from(self.backoff).saturating_mul(self.config.backoff_interval_ms());
                if now_ms.saturating_sub(self.last_attempt_ms) > wait {
                    self.attempt(now_ms, handler)
                } else {
                    TickStatus::BackingOff
                }
            }
            ConnectionState::Connected => match self.transport.poll() {
                Ok(messages) => {
                    for message in messages {
                        if let Err(err) = self.receive(&message.topic, &message.payload, handler) {
                            warn!(topic = %message.topic, error = %err, "dropping inbound message");
                        }
                    }
                    TickStatus::Connected
                }
                Err(err) => {
                    warn!(error = %err, "MQTT connection lost");
                    self.backoff = 0;
                    self.state = ConnectionState::Disconnected;
                    self.connected_at_ms = None;
                    handler.on_disconnected(err.reason());
                    TickStatus::ConnectionLost
                }
            },
        }
    }

    /// Drop the link now and retry without delay on the next tick.
    pub fn reconnect(&mut self, now_ms: u64) {
        info!("MQTT reconnect requested");
        self.close();
        self.backoff = 0;
        self.last_attempt_ms = now_ms;
    }

    /// Announce offline and drop the link.
    pub fn disconnect(&mut self) {
        self.close();
    }

    fn close(&mut self) {
        if self.state == ConnectionState::Connected {
            let lwt = self.topics.last_will();
            if let Err(err) = self.publish(&lwt, &json!({ "online": false }), true) {
                debug!(error = %err, "could not publish offline state");
            }
        }
        self.transport.disconnect();
        self.state = ConnectionState::Disconnected;
        self.connected_at_ms = None;
    }

    fn connect_request(&self) -> ConnectRequest {
        let credentials = match (&self.config.username, &self.config.password) {
            (Some(u), Some(p)) => Some((u.clone(), p.clone())),
            (Some(u), None) => Some((u.clone(), String::new())),
            _ => None,
        };
        ConnectRequest {
            client_id: self.config.client_id.clone(),
            host: self.config.host.clone(),
            port: self.config.port,
            credentials,
            keep_alive_secs: self.config.keep_alive_secs,
            clean_session: self.config.clean_session,
            last_will: LastWill {
                topic: self.topics.last_will(),
                payload: json!({ "online": false }).to_string().into_bytes(),
                retain: true,
            },
        }
    }

    fn attempt(&mut self, now_ms: u64, handler: &mut dyn SessionHandler) -> TickStatus {
        debug!(host = %self.config.host, port = self.config.port, attempt = self.backoff + 1, "connecting to MQTT broker");
        let request = self.connect_request();
        match self.transport.connect(&request) {
            Ok(()) => {
                self.established(now_ms, handler);
                TickStatus::Connected
            }
            Err(err) => {
                if self.backoff < self.config.max_backoff_count {
                    self.backoff += 1;
                }
                self.last_attempt_ms = now_ms;
                self.state = ConnectionState::BackingOff;
                self.stats.connect_failures += 1;
                let reason = err.reason();
                warn!(error = %err, code = reason.code(), backoff = self.backoff, "MQTT connect failed");
                handler.on_disconnected(reason);
                TickStatus::ConnectFailed(reason)
            }
        }
    }

    fn established(&mut self, now_ms: u64, handler: &mut dyn SessionHandler) {
        self.backoff = 0;
        self.last_attempt_ms = now_ms;
        self.connected_at_ms = Some(now_ms);
        self.state = ConnectionState::Connected;
        self.stats.connects += 1;
        info!(client_id = %self.topics.client_id(), "MQTT connected");

        for topic in [self.topics.config(), self.topics.command()] {
            if let Err(err) = self.subscribe(&topic) {
                warn!(%topic, error = %err, "subscribe failed");
            }
        }
        let lwt = self.topics.last_will();
        if let Err(err) = self.publish(&lwt, &json!({ "online": true }), true) {
            warn!(error = %err, "could not publish online state");
        }
        handler.on_connected(self);
    }

    /// Route one inbound message. Returns the kind it was delivered as.
    pub fn receive(&mut self, topic: &str, payload: &[u8], handler: &mut dyn SessionHandler) -> Result<TopicKind, ReceiveError> {
        self.stats.received += 1;
        if payload.is_empty() {
            return Err(ReceiveError::ZeroLength);
        }

        let kind = if topic == self.topics.compat_command() {
            Some(TopicKind::Command)
        } else {
            self.topics.kind_of(topic)
        };

        let doc: Value = match serde_json::from_slice(payload) {
            Ok(doc) => doc,
            Err(err) => {
                self.stats.malformed += 1;
                return Err(ReceiveError::MalformedPayload(err));
            }
        };

        let Some(kind) = kind else {
            self.stats.unroutable += 1;
            return Err(ReceiveError::UnroutableTopic(topic.to_string()));
        };
        let dispatch = match kind {
            TopicKind::Config => handler.on_config(&doc),
            TopicKind::Command => handler.on_command(&doc),
            _ => Dispatch::NoHandler,
        };
        match dispatch {
            Dispatch::Handled => {
                debug!(%topic, %kind, "message handled");
                Ok(kind)
            }
            Dispatch::NoHandler => {
                self.stats.unhandled += 1;
                Err(ReceiveError::NoHandler(kind))
            }
            Dispatch::Rejected => {
                self.stats.rejected += 1;
                Err(ReceiveError::InvalidDocument(kind))
            }
        }
    }

    pub fn publish_status(&mut self, doc: &Value) -> Result<(), PublishError> {
        self.publish_kind(TopicKind::Status, doc)
    }

    pub fn publish_telemetry(&mut self, doc: &Value) -> Result<(), PublishError> {
        self.publish_kind(TopicKind::Telemetry, doc)
    }

    pub fn publish_adopt(&mut self, doc: &Value) -> Result<(), PublishError> {
        self.publish_kind(TopicKind::Adopt, doc)
    }
}

impl<T: Transport> Publisher for Session<T> {
    fn topics(&self) -> &Topics {
        &self.topics
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    fn publish(&mut self, topic: &str, doc: &Value, retain: bool) -> Result<(), PublishError> {
        if self.state != ConnectionState::Connected {
            return Err(PublishError::NotConnected);
        }
        let payload = serde_json::to_vec(doc)?;
        self.transport.publish(topic, &payload, retain)?;
        self.stats.published += 1;
        Ok(())
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), PublishError> {
        if self.state != ConnectionState::Connected {
            return Err(PublishError::NotConnected);
        }
        self.transport.subscribe(topic)?;
        debug!(%topic, "subscribed");
        Ok(())
    }
}
