pub mod client;
pub mod config;
pub mod session;
pub mod transport;

pub use client::RumqttTransport;
pub use config::MqttConfig;
pub use session::{ConnectionState, Dispatch, PublishError, Publisher, ReceiveError, Session, SessionHandler, SessionStats, TickStatus};
pub use transport::{ConnectRequest, DisconnectReason, InboundMessage, LastWill, Transport, TransportError};
