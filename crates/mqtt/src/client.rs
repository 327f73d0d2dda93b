use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use tokio::runtime::{Builder, Runtime};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::MqttConfig;
use crate::transport::{ConnectRequest, DisconnectReason, InboundMessage, Transport, TransportError};

// Events drained per poll at most; the fade tick runs between polls.
const MAX_EVENTS_PER_POLL: usize = 64;

/// `Transport` over rumqttc. The event loop is driven on a private
/// current-thread runtime so callers stay synchronous.
pub struct RumqttTransport {
    runtime: Runtime,
    link: Option<(AsyncClient, EventLoop)>,
    connect_timeout: Duration,
    poll_timeout: Duration,
}

impl RumqttTransport {
    pub fn new(config: &MqttConfig) -> std::io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            runtime,
            link: None,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            poll_timeout: Duration::from_millis(config.poll_timeout_ms),
        })
    }
}

fn build_client(request: &ConnectRequest) -> (AsyncClient, EventLoop) {
    let mut opts = MqttOptions::new(&request.client_id, &request.host, request.port);
    opts.set_keep_alive(Duration::from_secs(u64::from(request.keep_alive_secs.max(5))));
    opts.set_clean_session(request.clean_session);
    if let Some((u, p)) = &request.credentials {
        opts.set_credentials(u.clone(), p.clone());
    }
    let will = &request.last_will;
    opts.set_last_will(rumqttc::LastWill::new(&will.topic, will.payload.clone(), QoS::AtMostOnce, will.retain));
    AsyncClient::new(opts, 64)
}

fn refused(code: ConnectReturnCode) -> DisconnectReason {
    match code {
        ConnectReturnCode::RefusedProtocolVersion => DisconnectReason::BadProtocol,
        ConnectReturnCode::BadClientId => DisconnectReason::BadClientId,
        ConnectReturnCode::ServiceUnavailable => DisconnectReason::Unavailable,
        ConnectReturnCode::BadUserNamePassword => DisconnectReason::BadCredentials,
        ConnectReturnCode::NotAuthorized => DisconnectReason::Unauthorized,
        ConnectReturnCode::Success => DisconnectReason::ConnectFailed,
    }
}

fn classify(err: &ConnectionError) -> TransportError {
    match err {
        ConnectionError::ConnectionRefused(code) => TransportError::Refused(refused(*code)),
        ConnectionError::NetworkTimeout => TransportError::Refused(DisconnectReason::ConnectionTimeout),
        other => TransportError::Lost(other.to_string()),
    }
}

impl Transport for RumqttTransport {
    fn connect(&mut self, request: &ConnectRequest) -> Result<(), TransportError> {
        self.link = None;
        let (client, mut eventloop) = build_client(request);
        let wait = self.connect_timeout;

        let outcome = self.runtime.block_on(async {
            timeout(wait, async {
                loop {
                    match eventloop.poll().await {
                        Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                            return match ack.code {
                                ConnectReturnCode::Success => Ok(()),
                                code => Err(TransportError::Refused(refused(code))),
                            };
                        }
                        Ok(other) => debug!(?other, "MQTT event while connecting"),
                        Err(e) => {
                            if let ConnectionError::Io(io) = &e {
                                return Err(TransportError::Refused(match io.kind() {
                                    std::io::ErrorKind::TimedOut => DisconnectReason::ConnectionTimeout,
                                    _ => DisconnectReason::ConnectFailed,
                                }));
                            }
                            return Err(classify(&e));
                        }
                    }
                }
            })
            .await
        });

        match outcome {
            Ok(Ok(())) => {
                info!(host = %request.host, port = request.port, "MQTT broker accepted connection");
                self.link = Some((client, eventloop));
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(_elapsed) => Err(TransportError::Refused(DisconnectReason::ConnectionTimeout)),
        }
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    fn poll(&mut self) -> Result<Vec<InboundMessage>, TransportError> {
        let Some((_, eventloop)) = self.link.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        let wait = self.poll_timeout;

        let result = self.runtime.block_on(async {
            let mut inbound = Vec::new();
            for _ in 0..MAX_EVENTS_PER_POLL {
                match timeout(wait, eventloop.poll()).await {
                    // Nothing more pending right now.
                    Err(_elapsed) => break,
                    Ok(Ok(Event::Incoming(Incoming::Publish(p)))) => {
                        inbound.push(InboundMessage { topic: p.topic.clone(), payload: p.payload.to_vec() });
                    }
                    Ok(Ok(Event::Incoming(Incoming::Disconnect))) => {
                        return Err(TransportError::Lost("broker sent disconnect".to_string()));
                    }
                    Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => {
                        return Err(TransportError::Lost("disconnect requested".to_string()));
                    }
                    Ok(Ok(other)) => debug!(?other, "MQTT event"),
                    Ok(Err(e)) => {
                        error!(error = ?e, "MQTT error");
                        return Err(classify(&e));
                    }
                }
            }
            Ok(inbound)
        });

        if result.is_err() {
            self.link = None;
        }
        result
    }

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let (client, _) = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        client.try_subscribe(topic, QoS::AtMostOnce).map_err(|e| TransportError::Request(e.to_string()))
    }

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError> {
        let (client, _) = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        client
            .try_publish(topic, QoS::AtMostOnce, retain, payload.to_vec())
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    fn disconnect(&mut self) {
        let Some((client, mut eventloop)) = self.link.take() else {
            return;
        };
        if let Err(err) = client.try_disconnect() {
            warn!(?err, "MQTT disconnect request failed");
            return;
        }
        // Flush queued publishes (the offline state) and the DISCONNECT packet.
        let wait = self.connect_timeout;
        let _ = self.runtime.block_on(timeout(wait, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        }));
        info!("MQTT disconnected");
    }
}
