//! Header names, destinations and heart-beat negotiation.

use std::time::Duration;

pub const HEADER_AUTHORIZATION: &str = "Authorization";
pub const HEADER_ACCEPT_VERSION: &str = "accept-version";
pub const HEADER_HEART_BEAT: &str = "heart-beat";
pub const HEADER_DESTINATION: &str = "destination";
pub const HEADER_ID: &str = "id";
pub const HEADER_SUBSCRIPTION: &str = "subscription";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_MESSAGE: &str = "message";
pub const HEADER_RECEIPT_ID: &str = "receipt-id";

pub const ACCEPT_VERSION: &str = "1.2,1.1,1.0";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Placeholder substituted with the room id in destination templates.
pub const ROOM_PLACEHOLDER: &str = "{room}";

/// `Authorization` header value for a bearer token.
pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

/// The `Authorization` header as a `(name, value)` pair.
pub fn authorization_header(token: &str) -> (String, String) {
    (HEADER_AUTHORIZATION.to_string(), bearer(token))
}

/// Destination templates for publishing to and subscribing on a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destinations {
    pub publish: String,
    pub subscribe: String,
}

impl Default for Destinations {
    fn default() -> Self {
        Self {
            publish: "/pub/chat/{room}-message".to_string(),
            subscribe: "/sub/room/{room}".to_string(),
        }
    }
}

impl Destinations {
    pub fn publish(&self, room_id: &str) -> String {
        self.publish.replace(ROOM_PLACEHOLDER, room_id)
    }

    pub fn subscribe(&self, room_id: &str) -> String {
        self.subscribe.replace(ROOM_PLACEHOLDER, room_id)
    }
}

/// A `heart-beat: cx,cy` value in milliseconds. Zero means "none".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    /// Smallest interval at which this side can send.
    pub outgoing_ms: u64,
    /// Interval at which this side wants to receive.
    pub incoming_ms: u64,
}

impl HeartBeat {
    pub fn new(outgoing_ms: u64, incoming_ms: u64) -> Self {
        Self {
            outgoing_ms,
            incoming_ms,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let (out, inc) = value.split_once(',')?;
        Some(Self {
            outgoing_ms: out.trim().parse().ok()?,
            incoming_ms: inc.trim().parse().ok()?,
        })
    }

    pub fn to_header(self) -> String {
        format!("{},{}", self.outgoing_ms, self.incoming_ms)
    }

    /// Negotiate against the server's CONNECTED value. Returns how often this
    /// side must send and how long it may wait for server traffic.
    pub fn negotiate(self, server: HeartBeat) -> NegotiatedHeartBeat {
        let pick = |mine: u64, theirs: u64| {
            (mine != 0 && theirs != 0).then(|| Duration::from_millis(mine.max(theirs)))
        };
        NegotiatedHeartBeat {
            send_every: pick(self.outgoing_ms, server.incoming_ms),
            expect_every: pick(self.incoming_ms, server.outgoing_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NegotiatedHeartBeat {
    pub send_every: Option<Duration>,
    pub expect_every: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_destinations() {
        let d = Destinations::default();
        assert_eq!(d.publish("lobby"), "/pub/chat/lobby-message");
        assert_eq!(d.subscribe("lobby"), "/sub/room/lobby");
    }

    #[test]
    fn bearer_header() {
        assert_eq!(
            authorization_header("tok1"),
            ("Authorization".to_string(), "Bearer tok1".to_string())
        );
    }

    #[test]
    fn heart_beat_parse() {
        assert_eq!(HeartBeat::parse("10000, 0"), Some(HeartBeat::new(10000, 0)));
        assert_eq!(HeartBeat::parse("abc"), None);
        assert_eq!(HeartBeat::new(1, 2).to_header(), "1,2");
    }

    #[test]
    fn heart_beat_negotiation() {
        let client = HeartBeat::new(10_000, 10_000);
        let n = client.negotiate(HeartBeat::new(0, 25_000));
        assert_eq!(n.send_every, Some(Duration::from_millis(25_000)));
        assert_eq!(n.expect_every, None);

        let none = HeartBeat::default().negotiate(HeartBeat::new(5_000, 5_000));
        assert_eq!(none, NegotiatedHeartBeat::default());
    }
}
