//! Shared wire types for the roomchat client: STOMP frames, SockJS framing
//! and the chat message model.

pub mod error;
pub mod frame;
pub mod models;
pub mod protocol;
pub mod sockjs;

pub use error::*;
pub use frame::{Command, Frame, FrameParser, Incoming};
pub use models::*;
pub use protocol::*;
pub use sockjs::{SockJsFrame, SockJsInfo};
