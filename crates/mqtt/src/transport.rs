//! The network capability the session drives. Any stack that can connect,
//! poll, subscribe and publish to a broker satisfies it.

use std::fmt;

use thiserror::Error;

/// Why a connection attempt failed or an established link went away.
/// Codes follow the classic Arduino PubSubClient `state()` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ConnectionTimeout,
    ConnectionLost,
    ConnectFailed,
    Disconnected,
    BadProtocol,
    BadClientId,
    Unavailable,
    BadCredentials,
    Unauthorized,
}

impl DisconnectReason {
    pub fn code(self) -> i32 {
        match self {
            DisconnectReason::ConnectionTimeout => -4,
            DisconnectReason::ConnectionLost => -3,
            DisconnectReason::ConnectFailed => -2,
            DisconnectReason::Disconnected => -1,
            DisconnectReason::BadProtocol => 1,
            DisconnectReason::BadClientId => 2,
            DisconnectReason::Unavailable => 3,
            DisconnectReason::BadCredentials => 4,
            DisconnectReason::Unauthorized => 5,
        }
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisconnectReason::ConnectionTimeout => "connection timeout",
            DisconnectReason::ConnectionLost => "connection lost",
            DisconnectReason::ConnectFailed => "connect failed",
            DisconnectReason::Disconnected => "disconnected",
            DisconnectReason::BadProtocol => "bad protocol",
            DisconnectReason::BadClientId => "bad client id",
            DisconnectReason::Unavailable => "unavailable",
            DisconnectReason::BadCredentials => "bad credentials",
            DisconnectReason::Unauthorized => "unauthorised",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect refused: {0}")]
    Refused(DisconnectReason),
    #[error("not connected")]
    NotConnected,
    #[error("connection lost: {0}")]
    Lost(String),
    #[error("request rejected: {0}")]
    Request(String),
}

impl TransportError {
    pub fn reason(&self) -> DisconnectReason {
        match self {
            TransportError::Refused(reason) => *reason,
            TransportError::NotConnected => DisconnectReason::Disconnected,
            TransportError::Lost(_) => DisconnectReason::ConnectionLost,
            TransportError::Request(_) => DisconnectReason::ConnectFailed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Everything a transport needs to open a session with the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub credentials: Option<(String, String)>,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    pub last_will: LastWill,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub trait Transport {
    /// Open a session. Blocks at most for the transport's connect timeout.
    fn connect(&mut self, request: &ConnectRequest) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Service keepalive and drain whatever has arrived. An error means the
    /// link is gone.
    fn poll(&mut self) -> Result<Vec<InboundMessage>, TransportError>;

    fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    fn publish(&mut self, topic: &str, payload: &[u8], retain: bool) -> Result<(), TransportError>;

    fn disconnect(&mut self);
}
