//! roomchat client
//!
//! STOMP-over-SockJS chat client: transports, the STOMP connection loop and
//! the chat session state machine a front-end drives.

#[macro_use]
pub mod logging;

pub mod config;
pub mod session;
pub mod stomp;
pub mod store;
pub mod transport;

pub use config::{ClientConfig, ConfigError};
pub use session::{ChatSession, Delivery, InboundStream, SessionState, SessionUpdate};
pub use stomp::{Generation, LinkEvent, LinkEventKind, StompClient, StompLink, StompOptions};
pub use store::MessageLog;
pub use transport::{Connector, SockJsConnector, TransportError, TransportKind};
