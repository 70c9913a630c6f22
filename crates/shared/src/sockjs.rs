//! SockJS framing.
//!
//! Every server frame starts with a one-letter type: `o` open, `h` heartbeat,
//! `a` a JSON array of messages, `c` a JSON `[code, reason]` close. Clients
//! send a bare JSON array of strings.

use serde::Deserialize;

use crate::error::SockJsError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SockJsFrame {
    Open,
    Heartbeat,
    Messages(Vec<String>),
    Close { code: u16, reason: String },
}

impl SockJsFrame {
    pub fn parse(raw: &str) -> Result<Self, SockJsError> {
        let mut chars = raw.chars();
        let kind = chars.next().ok_or(SockJsError::Empty)?;
        let payload = chars.as_str();
        match kind {
            'o' => Ok(SockJsFrame::Open),
            'h' => Ok(SockJsFrame::Heartbeat),
            'a' => serde_json::from_str::<Vec<String>>(payload)
                .map(SockJsFrame::Messages)
                .map_err(|e| SockJsError::Payload(e.to_string())),
            'c' => serde_json::from_str::<(u16, String)>(payload)
                .map(|(code, reason)| SockJsFrame::Close { code, reason })
                .map_err(|e| SockJsError::Payload(e.to_string())),
            other => Err(SockJsError::UnknownType(other)),
        }
    }
}

/// Encode outbound messages the way the server expects them on the socket
/// and in `xhr_send` bodies.
pub fn encode_messages(messages: &[String]) -> String {
    // A slice of strings always serializes.
    serde_json::to_string(messages).unwrap_or_else(|_| "[]".to_string())
}

/// Body of `GET {endpoint}/info`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SockJsInfo {
    pub websocket: bool,
    #[serde(default)]
    pub cookie_needed: bool,
    #[serde(default)]
    pub origins: Vec<String>,
    #[serde(default)]
    pub entropy: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_control_frames() {
        assert_eq!(SockJsFrame::parse("o"), Ok(SockJsFrame::Open));
        assert_eq!(SockJsFrame::parse("h"), Ok(SockJsFrame::Heartbeat));
        assert_eq!(
            SockJsFrame::parse("c[3000,\"Go away!\"]"),
            Ok(SockJsFrame::Close {
                code: 3000,
                reason: "Go away!".to_string()
            })
        );
    }

    #[test]
    fn parses_message_arrays() {
        let frame = SockJsFrame::parse(r#"a["CONNECTED\nversion:1.2\n\n\u0000","\n"]"#).unwrap();
        assert_eq!(
            frame,
            SockJsFrame::Messages(vec![
                "CONNECTED\nversion:1.2\n\n\0".to_string(),
                "\n".to_string()
            ])
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(SockJsFrame::parse(""), Err(SockJsError::Empty));
        assert_eq!(SockJsFrame::parse("x"), Err(SockJsError::UnknownType('x')));
        assert!(matches!(
            SockJsFrame::parse("a{not json"),
            Err(SockJsError::Payload(_))
        ));
    }

    #[test]
    fn encodes_outbound_messages() {
        let out = encode_messages(&["SEND\n\nhi\0".to_string()]);
        assert_eq!(out, r#"["SEND\n\nhi\u0000"]"#);
    }

    #[test]
    fn info_defaults_optional_fields() {
        let info: SockJsInfo = serde_json::from_str(r#"{"websocket":false}"#).unwrap();
        assert!(!info.websocket);
        assert!(!info.cookie_needed);
        assert!(info.origins.is_empty());
    }
}
