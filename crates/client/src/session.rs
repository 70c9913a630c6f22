//! Chat session: the connect → subscribe → publish lifecycle.
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──CONNECTED──▶ Connected ──subscribe──▶ Subscribed(room)
//!       ▲                       │                                                │   ▲
//!       └──transport error / ERROR                                               └───┘ send
//! ```
//!
//! The session owns its state and is driven from a single task: user actions
//! call [`ChatSession::begin_connect`], [`ChatSession::subscribe`] and
//! [`ChatSession::send`] directly, and link callbacks arrive through
//! [`ChatSession::next_update`]. Every activation of the link gets a new
//! generation number; events carrying an older generation are ignored, so a
//! late failure from an abandoned attempt can never clobber a newer session.
//!
//! Received chat messages are not returned from `next_update`. They go to the
//! [`InboundStream`] handed out once by [`ChatSession::take_inbound`].

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_channel::mpsc as inbound;
use futures_util::Stream;
use roomchat_shared::{
    authorization_header, ChatMessage, ConnectError, Destinations, InboundEvent,
    NotConnectedError, SendError, SubscribeError, HEADER_CONTENT_TYPE, JSON_CONTENT_TYPE,
};
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::config::ClientConfig;
use crate::stomp::{Generation, LinkEvent, LinkEventKind, StompClient, StompLink, StompOptions};
use crate::transport::{SockJsConnector, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Subscribed(String),
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Subscribed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => f.write_str("disconnected"),
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::Connected => f.write_str("connected"),
            SessionState::Subscribed(room) => write!(f, "subscribed to {room}"),
        }
    }
}

/// What happened to a `send` that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Published,
    /// Blank text: nothing was published.
    SkippedBlank,
}

/// Lifecycle changes worth showing to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionUpdate {
    Connected,
    ConnectFailed(ConnectError),
    /// The link dropped after the handshake. It reconnects on its own unless
    /// reconnection is disabled.
    LinkLost { reason: String },
    /// The link reconnected; subscriptions were replayed.
    LinkRestored,
    BrokerError { message: String },
}

/// Inbound chat messages for the lifetime of the session. Unbounded and not
/// restartable: once taken it cannot be handed out again.
pub struct InboundStream {
    receiver: inbound::UnboundedReceiver<InboundEvent>,
}

impl Stream for InboundStream {
    type Item = InboundEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

pub struct ChatSession<L: StompLink> {
    link: L,
    events: UnboundedReceiver<LinkEvent>,
    state: SessionState,
    token: Option<String>,
    generation: Generation,
    sender: String,
    destinations: Destinations,
    /// Id of the live subscription, if any.
    subscription: Option<String>,
    next_subscription: u64,
    inbound_tx: inbound::UnboundedSender<InboundEvent>,
    inbound_rx: Option<InboundStream>,
}

impl ChatSession<StompClient<SockJsConnector>> {
    /// A session over SockJS as described by `config`. Must be called inside
    /// a tokio runtime before the first connect.
    pub fn open(config: &ClientConfig) -> Result<Self, TransportError> {
        let connector = SockJsConnector::new(config)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let link = StompClient::new(connector, StompOptions::from(config), events_tx);
        Ok(Self::new(
            link,
            events_rx,
            config.sender.clone(),
            config.destinations.clone(),
        ))
    }
}

impl<L: StompLink> ChatSession<L> {
    pub fn new(
        link: L,
        events: UnboundedReceiver<LinkEvent>,
        sender: impl Into<String>,
        destinations: Destinations,
    ) -> Self {
        let (inbound_tx, receiver) = inbound::unbounded();
        Self {
            link,
            events,
            state: SessionState::Disconnected,
            token: None,
            generation: 0,
            sender: sender.into(),
            destinations,
            subscription: None,
            next_subscription: 0,
            inbound_tx,
            inbound_rx: Some(InboundStream { receiver }),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn room(&self) -> Option<&str> {
        match &self.state {
            SessionState::Subscribed(room) => Some(room),
            _ => None,
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// The inbound message stream. Only the first call returns it.
    pub fn take_inbound(&mut self) -> Option<InboundStream> {
        self.inbound_rx.take()
    }

    /// Start a connection attempt with `token` as bearer credential.
    ///
    /// An active or pending session is replaced: its link is deactivated and
    /// its generation retired before the new attempt starts.
    pub fn begin_connect(&mut self, token: &str) -> Result<Generation, ConnectError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ConnectError::MissingToken);
        }

        if self.state != SessionState::Disconnected {
            crate::log_info!(
                "Replacing {} session (generation {})",
                self.state,
                self.generation
            );
            self.link.deactivate();
        }

        self.generation += 1;
        self.subscription = None;
        self.token = Some(token.to_string());
        self.state = SessionState::Connecting;
        self.link
            .activate(self.generation, vec![authorization_header(token)]);
        crate::log_info!("Connecting (generation {})", self.generation);
        Ok(self.generation)
    }

    /// Connect and wait for the handshake to finish.
    pub async fn connect(&mut self, token: &str) -> Result<(), ConnectError> {
        self.begin_connect(token)?;
        loop {
            match self.next_update().await {
                Some(SessionUpdate::Connected) => return Ok(()),
                Some(SessionUpdate::ConnectFailed(e)) => return Err(e),
                Some(other) => crate::log_debug!("Ignoring {:?} while connecting", other),
                None => {
                    self.teardown();
                    return Err(ConnectError::Closed("link event channel closed".to_string()));
                }
            }
        }
    }

    /// Join `room_id` and announce presence with an Enter message.
    ///
    /// Subscribing again to the current room does nothing. Switching rooms
    /// subscribes to the new one and then leaves the old one. If the link
    /// refuses the SUBSCRIBE the session stays where it was.
    pub fn subscribe(&mut self, room_id: &str) -> Result<(), SubscribeError> {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return Err(SubscribeError::BlankRoom);
        }
        let token = match (&self.state, &self.token) {
            (SessionState::Connected | SessionState::Subscribed(_), Some(token)) => token.clone(),
            _ => return Err(self.not_connected().into()),
        };

        if self.room() == Some(room_id) {
            crate::log_debug!("Already subscribed to {}", room_id);
            return Ok(());
        }

        let id = format!("sub-{}", self.next_subscription);
        self.next_subscription += 1;
        let destination = self.destinations.subscribe(room_id);
        self.link
            .subscribe(&id, &destination, vec![authorization_header(&token)])
            .map_err(|e| SubscribeError::LinkClosed(e.to_string()))?;
        crate::log_info!("Subscribed to {} ({})", destination, id);

        if let Some(old) = self.subscription.take() {
            crate::log_info!("Leaving {} ({})", self.state, old);
            if let Err(e) = self.link.unsubscribe(&old) {
                crate::log_warn!("Unsubscribe {} failed: {}", old, e);
            }
        }
        self.subscription = Some(id);
        self.state = SessionState::Subscribed(room_id.to_string());

        // Queued after SUBSCRIBE, so the broker registers us before it sees
        // the announcement.
        let enter = ChatMessage::enter(room_id, &self.sender);
        if let Err(e) = self.publish(&enter) {
            crate::log_warn!("Could not announce presence in {}: {}", room_id, e);
        }
        Ok(())
    }

    /// Publish `text` to `room_id`. The room must be the subscribed one.
    pub fn send(&mut self, room_id: &str, text: &str) -> Result<Delivery, SendError> {
        match &self.state {
            SessionState::Subscribed(current) if current == room_id => {}
            _ => {
                return Err(SendError::NotSubscribed {
                    room: room_id.to_string(),
                })
            }
        }
        if text.trim().is_empty() {
            return Ok(Delivery::SkippedBlank);
        }
        let message = ChatMessage::chat(room_id, &self.sender, text);
        self.publish(&message)?;
        Ok(Delivery::Published)
    }

    /// Tear the session down. Events from the old link are ignored from here on.
    pub fn disconnect(&mut self) {
        if self.state != SessionState::Disconnected {
            crate::log_info!("Disconnecting ({})", self.state);
        }
        self.teardown();
        self.token = None;
    }

    /// Wait for the next lifecycle update. Inbound messages are routed to the
    /// inbound stream while waiting. Returns `None` if the link went away.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let event = self.events.recv().await?;
            if let Some(update) = self.handle_link_event(event) {
                return Some(update);
            }
        }
    }

    /// Apply one link event.
    pub fn handle_link_event(&mut self, event: LinkEvent) -> Option<SessionUpdate> {
        if event.generation != self.generation || self.state == SessionState::Disconnected {
            crate::log_debug!(
                "Ignoring stale link event from generation {} (current {})",
                event.generation,
                self.generation
            );
            return None;
        }

        match event.kind {
            LinkEventKind::Connected { server, version } => {
                if self.state == SessionState::Connecting {
                    crate::log_info!(
                        "Connected to {} (STOMP {})",
                        server.as_deref().unwrap_or("broker"),
                        version.as_deref().unwrap_or("1.0")
                    );
                    self.state = SessionState::Connected;
                    Some(SessionUpdate::Connected)
                } else {
                    crate::log_info!("Link restored");
                    Some(SessionUpdate::LinkRestored)
                }
            }
            LinkEventKind::TransportFailed { reason } => {
                if self.state == SessionState::Connecting {
                    Some(self.fail_connect(ConnectError::Transport(reason)))
                } else {
                    Some(SessionUpdate::LinkLost { reason })
                }
            }
            LinkEventKind::StompError { message } => {
                if self.state == SessionState::Connecting {
                    Some(self.fail_connect(ConnectError::Rejected(message)))
                } else {
                    Some(SessionUpdate::BrokerError { message })
                }
            }
            LinkEventKind::Disconnected { reason } => {
                if self.state == SessionState::Connecting {
                    Some(self.fail_connect(ConnectError::Closed(reason)))
                } else {
                    Some(SessionUpdate::LinkLost { reason })
                }
            }
            LinkEventKind::Message {
                subscription,
                destination,
                body,
            } => {
                self.deliver(&subscription, &destination, &body);
                None
            }
        }
    }

    fn deliver(&mut self, subscription: &str, destination: &str, body: &str) {
        let (Some(current), SessionState::Subscribed(room)) = (&self.subscription, &self.state)
        else {
            crate::log_debug!("Dropping message on {} outside a subscription", destination);
            return;
        };
        if current != subscription {
            crate::log_debug!("Dropping message for old subscription {}", subscription);
            return;
        }

        match ChatMessage::from_body(body) {
            Ok(payload) => {
                let event = InboundEvent::new(room.clone(), payload);
                if self.inbound_tx.unbounded_send(event).is_err() {
                    crate::log_debug!("Inbound stream dropped, discarding message");
                }
            }
            Err(e) => crate::log_warn!("Dropping malformed message on {}: {}", destination, e),
        }
    }

    fn publish(&mut self, message: &ChatMessage) -> Result<(), SendError> {
        let token = self.token.as_deref().unwrap_or_default();
        let body = message
            .to_body()
            .map_err(|e| SendError::Encode(e.to_string()))?;
        let headers = vec![
            authorization_header(token),
            (
                HEADER_CONTENT_TYPE.to_string(),
                JSON_CONTENT_TYPE.to_string(),
            ),
        ];
        let destination = self.destinations.publish(message.room_id());
        self.link
            .publish(&destination, headers, body)
            .map_err(|e| SendError::LinkClosed(e.to_string()))
    }

    fn fail_connect(&mut self, error: ConnectError) -> SessionUpdate {
        crate::log_error!("Connect failed: {}", error);
        self.teardown();
        SessionUpdate::ConnectFailed(error)
    }

    fn teardown(&mut self) {
        self.link.deactivate();
        self.generation += 1;
        self.subscription = None;
        self.state = SessionState::Disconnected;
    }

    fn not_connected(&self) -> NotConnectedError {
        NotConnectedError {
            state: self.state.to_string(),
        }
    }
}

impl<L: StompLink> Drop for ChatSession<L> {
    fn drop(&mut self) {
        self.link.deactivate();
    }
}
