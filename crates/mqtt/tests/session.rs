use std::collections::VecDeque;

use ledc_core::TopicKind;
use ledc_mqtt::{
    ConnectRequest, ConnectionState, DisconnectReason, Dispatch, InboundMessage, MqttConfig, PublishError, Publisher,
    ReceiveError, Session, SessionHandler, TickStatus, Transport, TransportError,
};
use proptest::prelude::*;
use serde_json::{json, Value};

#[derive(Default)]
struct ScriptedTransport {
    connect_results: VecDeque<Result<(), TransportError>>,
    inbound: VecDeque<Result<Vec<InboundMessage>, TransportError>>,
    connected: bool,
    requests: Vec<ConnectRequest>,
    subscriptions: Vec<String>,
    published: Vec<(String, Value, bool)>,
    disconnects: usize,
}

impl ScriptedTransport {
    fn refusing(n: usize) -> Self {
        let mut t = Self::default();
        for _ in 0..n {
            t.connect_results.push_back(Err(TransportError::Refused(DisconnectReason::Unavailable)));
        }
        t
    }

    fn publishes_to(&self, topic: &str) -> Vec<(Value, bool)> {
        self.published.iter().filter(|(t, _, _)| t == topic).map(|(_, v, r)| (v.clone(), *r)).collect()
    }
}

impl Transport for ScriptedTransport {
    fn connect(&mut self, request: &ConnectRequest) -> Result<(), TransportError> {
        self.requests.push(request.clone());
        let result = self.connect_results.pop_front().unwrap_or(Ok(()));
        self.connected = result.is_ok();
        result
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn poll(&mut self) -> Result<Vec<InboundMessage>, TransportError> {
        let next = self.inbound.pop_front().unwrap_or(Ok(Vec::new()));
        if next.is_err() {
            self.connected = false;
        }
        next
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
        let doc = serde_json::from_slice(payload).unwrap();
        self.published.push((topic.to_string(), doc, retain));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.disconnects += 1;
    }
}

#[derive(Default)]
struct Recorder {
    connected: usize,
    reasons: Vec<DisconnectReason>,
    configs: Vec<Value>,
    commands: Vec<Value>,
    handle_config: bool,
    handle_command: bool,
}

impl Recorder {
    fn accepting() -> Self {
        Self { handle_config: true, handle_command: true, ..Self::default() }
    }
}

impl SessionHandler for Recorder {
    fn on_connected(&mut self, session: &mut dyn Publisher) {
        self.connected += 1;
        session.publish_kind(TopicKind::Adopt, &json!({ "hello": true })).unwrap();
    }

    fn on_disconnected(&mut self, reason: DisconnectReason) {
        self.reasons.push(reason);
    }

    fn on_config(&mut self, doc: &Value) -> Dispatch {
        if !self.handle_config {
            return Dispatch::NoHandler;
        }
        self.configs.push(doc.clone());
        Dispatch::Handled
    }

    fn on_command(&mut self, doc: &Value) -> Dispatch {
        if !self.handle_command {
            return Dispatch::NoHandler;
        }
        self.commands.push(doc.clone());
        Dispatch::Handled
    }
}

fn config() -> MqttConfig {
    MqttConfig {
        client_id: "ABC123".to_string(),
        topic_prefix: "hsg".to_string(),
        backoff_secs: 5,
        max_backoff_count: 5,
        ..MqttConfig::default()
    }
}

fn connected_session(handler: &mut impl SessionHandler) -> Session<ScriptedTransport> {
    let mut session = Session::new(ScriptedTransport::default(), config());
    assert_eq!(session.tick(0, handler), TickStatus::Connected);
    session
}

#[test]
fn connect_subscribes_and_announces_online() {
    let mut handler = Recorder::accepting();
    let session = connected_session(&mut handler);

    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(session.backoff(), 0);
    assert_eq!(handler.connected, 1);

    let transport = session.transport();
    assert_eq!(transport.subscriptions, vec!["hsg/conf/ABC123", "hsg/cmnd/ABC123"]);
    assert_eq!(transport.publishes_to("hsg/ABC123/lwt"), vec![(json!({ "online": true }), true)]);
    assert_eq!(transport.publishes_to("hsg/stat/ABC123/adopt"), vec![(json!({ "hello": true }), true)]);

    let will = &transport.requests[0].last_will;
    assert_eq!(will.topic, "hsg/ABC123/lwt");
    assert_eq!(serde_json::from_slice::<Value>(&will.payload).unwrap(), json!({ "online": false }));
    assert!(will.retain);
}

#[test]
fn failures_back_off_linearly() {
    let mut handler = Recorder::default();
    let mut session = Session::new(ScriptedTransport::refusing(2), config());

    assert_eq!(session.tick(0, &mut handler), TickStatus::ConnectFailed(DisconnectReason::Unavailable));
    assert_eq!(session.state(), ConnectionState::BackingOff);
    assert_eq!(session.backoff(), 1);

    // One step of 5 s must fully elapse.
    assert_eq!(session.tick(5_000, &mut handler), TickStatus::BackingOff);
    assert_eq!(session.tick(5_001, &mut handler), TickStatus::ConnectFailed(DisconnectReason::Unavailable));
    assert_eq!(session.backoff(), 2);

    assert_eq!(session.tick(15_001, &mut handler), TickStatus::BackingOff);
    assert_eq!(session.tick(15_002, &mut handler), TickStatus::Connected);
    assert_eq!(session.backoff(), 0);
    assert_eq!(session.transport().requests.len(), 3);
    assert_eq!(handler.reasons, vec![DisconnectReason::Unavailable; 2]);
    assert_eq!(session.stats().connect_failures, 2);
}

#[test]
fn backoff_is_capped() {
    let mut handler = Recorder::default();
    let mut session = Session::new(ScriptedTransport::refusing(20), config());
    let mut now = 0;
    for _ in 0..20 {
        session.tick(now, &mut handler);
        now += 60_000;
    }
    assert_eq!(session.backoff(), 5);
    assert_eq!(session.transport().requests.len(), 20);
}

#[test]
fn reconnect_retries_immediately_and_publishes_offline() {
    let mut handler = Recorder::accepting();
    let mut session = connected_session(&mut handler);

    session.reconnect(1_000);
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.transport().disconnects, 1);
    assert_eq!(session.transport().publishes_to("hsg/ABC123/lwt").last(), Some(&(json!({ "online": false }), true)));

    assert_eq!(session.tick(1_001, &mut handler), TickStatus::Connected);
    assert_eq!(handler.connected, 2);
}

#[test]
fn lost_connection_resets_backoff_and_reconnects() {
    let mut handler = Recorder::accepting();
    let mut session = connected_session(&mut handler);
    session.transport_mut().inbound.push_back(Err(TransportError::Lost("reset by peer".into())));

    assert_eq!(session.tick(10, &mut handler), TickStatus::ConnectionLost);
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(session.backoff(), 0);
    assert_eq!(handler.reasons, vec![DisconnectReason::ConnectionLost]);

    assert_eq!(session.tick(20, &mut handler), TickStatus::Connected);
}

#[test]
fn inbound_messages_are_routed_by_kind() {
    let mut handler = Recorder::accepting();
    let mut session = connected_session(&mut handler);
    session.transport_mut().inbound.push_back(Ok(vec![
        InboundMessage { topic: "hsg/conf/ABC123".into(), payload: br#"{"fadeDurationMs":10}"#.to_vec() },
        InboundMessage { topic: "hsg/cmnd/ABC123".into(), payload: br#"{"output":1,"state":"on"}"#.to_vec() },
        InboundMessage { topic: "hsg/ABC123/cmnd".into(), payload: br#"{"restart":true}"#.to_vec() },
    ]));

    assert_eq!(session.tick(5, &mut handler), TickStatus::Connected);
    assert_eq!(handler.configs, vec![json!({ "fadeDurationMs": 10 })]);
    assert_eq!(handler.commands, vec![json!({ "output": 1, "state": "on" }), json!({ "restart": true })]);
    assert_eq!(session.stats().received, 3);
}

#[test]
fn bad_messages_are_dropped_without_side_effects() {
    let mut handler = Recorder::accepting();
    let mut session = connected_session(&mut handler);

    let err = session.receive("hsg/cmnd/ABC123", b"", &mut handler).unwrap_err();
    assert!(matches!(err, ReceiveError::ZeroLength));

    let err = session.receive("hsg/cmnd/ABC123", b"{not json", &mut handler).unwrap_err();
    assert!(matches!(err, ReceiveError::MalformedPayload(_)));

    let err = session.receive("other/cmnd/ABC123", b"{}", &mut handler).unwrap_err();
    assert!(matches!(err, ReceiveError::UnroutableTopic(topic) if topic == "other/cmnd/ABC123"));

    let err = session.receive("hsg/tele/ABC123", b"{}", &mut handler).unwrap_err();
    assert!(matches!(err, ReceiveError::NoHandler(TopicKind::Telemetry)));

    assert!(handler.commands.is_empty());
    assert!(handler.configs.is_empty());
    let stats = session.stats();
    assert_eq!((stats.malformed, stats.unroutable, stats.unhandled), (1, 1, 1));
}

#[test]
fn missing_hook_reports_no_handler() {
    let mut handler = Recorder { handle_command: true, ..Recorder::default() };
    let mut session = connected_session(&mut handler);

    let err = session.receive("hsg/config/ABC123", b"{}", &mut handler).unwrap_err();
    assert!(matches!(err, ReceiveError::NoHandler(TopicKind::Config)));
    assert_eq!(session.receive("hsg/cmnd/ABC123", b"{}", &mut handler).unwrap(), TopicKind::Command);
}

struct Strict;

impl SessionHandler for Strict {
    fn on_command(&mut self, doc: &Value) -> Dispatch {
        if doc.get("output").is_some() {
            Dispatch::Handled
        } else {
            Dispatch::Rejected
        }
    }
}

#[test]
fn rejected_documents_are_counted_apart_from_missing_hooks() {
    let mut handler = Strict;
    let mut session = connected_session(&mut handler);

    let err = session.receive("hsg/cmnd/ABC123", br#"{"group":"nowhere"}"#, &mut handler).unwrap_err();
    assert!(matches!(err, ReceiveError::InvalidDocument(TopicKind::Command)));
    assert_eq!(session.receive("hsg/cmnd/ABC123", br#"{"output":1}"#, &mut handler).unwrap(), TopicKind::Command);

    let err = session.receive("hsg/config/ABC123", b"{}", &mut handler).unwrap_err();
    assert!(matches!(err, ReceiveError::NoHandler(TopicKind::Config)));

    let stats = session.stats();
    assert_eq!((stats.rejected, stats.unhandled), (1, 1));
}

#[test]
fn publishing_needs_a_connection() {
    let mut handler = Recorder::default();
    let mut session = Session::new(ScriptedTransport::refusing(1), config());
    session.tick(0, &mut handler);

    assert!(matches!(session.publish_status(&json!({ "output": 1 })), Err(PublishError::NotConnected)));
    assert!(session.transport().published.is_empty());
}

#[test]
fn status_is_retained_and_telemetry_is_not() {
    let mut handler = Recorder::accepting();
    let mut session = connected_session(&mut handler);
    session.publish_status(&json!({ "output": 1, "state": "ON" })).unwrap();
    session.publish_telemetry(&json!({ "uptime": 1 })).unwrap();

    let transport = session.transport();
    assert_eq!(transport.publishes_to("hsg/stat/ABC123"), vec![(json!({ "output": 1, "state": "ON" }), true)]);
    assert_eq!(transport.publishes_to("hsg/tele/ABC123"), vec![(json!({ "uptime": 1 }), false)]);
}

#[test]
fn disconnect_announces_offline_once() {
    let mut handler = Recorder::accepting();
    let mut session = connected_session(&mut handler);
    session.disconnect();
    session.disconnect();

    let offline = session
        .transport()
        .publishes_to("hsg/ABC123/lwt")
        .into_iter()
        .filter(|(doc, _)| doc == &json!({ "online": false }))
        .count();
    assert_eq!(offline, 1);
    assert_eq!(session.state(), ConnectionState::Disconnected);
}

proptest! {
    #[test]
    fn backoff_never_decreases_while_failing(steps in proptest::collection::vec(0u64..40_000, 1..40)) {
        let mut handler = Recorder::default();
        let mut session = Session::new(ScriptedTransport::refusing(100), config());
        let mut now = 0;
        let mut previous = 0;
        for step in steps {
            now += step;
            session.tick(now, &mut handler);
            prop_assert!(session.backoff() >= previous);
            prop_assert!(session.backoff() <= 5);
            previous = session.backoff();
        }
    }
}
