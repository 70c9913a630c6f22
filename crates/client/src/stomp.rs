//! STOMP link with state management and auto-reconnect.
//!
//! [`StompClient`] owns at most one activation at a time. Each activation runs
//! a background task that opens a transport, performs the CONNECT handshake,
//! pumps frames and reconnects after a fixed delay when the transport drops.
//! Everything the task observes is reported as a [`LinkEvent`] tagged with the
//! generation it was activated with, so the owner can discard events from an
//! activation it has already abandoned.

use std::sync::Arc;
use std::time::Duration;

use roomchat_shared::{
    Command, Frame, FrameError, FrameParser, HeartBeat, Incoming, NegotiatedHeartBeat,
    ACCEPT_VERSION, HEADER_ACCEPT_VERSION, HEADER_DESTINATION, HEADER_HEART_BEAT, HEADER_ID,
    HEADER_MESSAGE, HEADER_RECEIPT_ID, HEADER_SUBSCRIPTION,
};
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;

use crate::config::ClientConfig;
use crate::transport::{Connector, TransportEvent, TransportLink};

/// Identifies one activation of a link.
pub type Generation = u64;

pub type Headers = Vec<(String, String)>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEventKind {
    /// CONNECTED received. Also sent after every successful reconnect.
    Connected {
        server: Option<String>,
        version: Option<String>,
    },
    Message {
        subscription: String,
        destination: String,
        body: String,
    },
    /// ERROR frame from the broker.
    StompError { message: String },
    /// The transport could not be opened or died before CONNECTED.
    TransportFailed { reason: String },
    /// An established connection was lost.
    Disconnected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub generation: Generation,
    pub kind: LinkEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no active STOMP link")]
pub struct LinkClosed;

/// The operations a chat session needs from a STOMP connection.
///
/// Commands are written in the order they are issued. Commands issued while
/// the connection is down are held and flushed after the next handshake.
pub trait StompLink {
    /// Start connecting, replacing any previous activation.
    fn activate(&mut self, generation: Generation, connect_headers: Headers);
    fn subscribe(&mut self, id: &str, destination: &str, headers: Headers)
        -> Result<(), LinkClosed>;
    fn unsubscribe(&mut self, id: &str) -> Result<(), LinkClosed>;
    fn publish(&mut self, destination: &str, headers: Headers, body: String)
        -> Result<(), LinkClosed>;
    /// Stop the current activation. No events follow for its generation.
    fn deactivate(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StompOptions {
    pub heartbeat: HeartBeat,
    /// Zero disables reconnection.
    pub reconnect_delay: Duration,
    pub connect_timeout: Option<Duration>,
}

impl From<&ClientConfig> for StompOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            heartbeat: config.heartbeat,
            reconnect_delay: config.reconnect_delay,
            connect_timeout: config.connect_timeout,
        }
    }
}

#[derive(Debug)]
enum Outbound {
    Subscribe {
        id: String,
        destination: String,
        headers: Headers,
    },
    Unsubscribe {
        id: String,
    },
    Send {
        destination: String,
        headers: Headers,
        body: String,
    },
}

struct Activation {
    generation: Generation,
    commands: UnboundedSender<Outbound>,
    cancel: CancellationToken,
}

pub struct StompClient<C: Connector> {
    connector: Arc<C>,
    options: StompOptions,
    events: UnboundedSender<LinkEvent>,
    active: Option<Activation>,
}

impl<C: Connector> StompClient<C> {
    pub fn new(connector: C, options: StompOptions, events: UnboundedSender<LinkEvent>) -> Self {
        Self {
            connector: Arc::new(connector),
            options,
            events,
            active: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    fn command(&self, outbound: Outbound) -> Result<(), LinkClosed> {
        let active = self.active.as_ref().ok_or(LinkClosed)?;
        active.commands.send(outbound).map_err(|_| LinkClosed)
    }
}

impl<C: Connector> StompLink for StompClient<C> {
    fn activate(&mut self, generation: Generation, connect_headers: Headers) {
        self.deactivate();

        let (commands, receiver) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = ConnectionTask {
            connector: self.connector.clone(),
            options: self.options.clone(),
            generation,
            connect_headers,
            commands: receiver,
            events: self.events.clone(),
            cancel: cancel.clone(),
            subscriptions: Vec::new(),
        };
        tokio::spawn(task.run());

        crate::log_debug!("STOMP link activated (generation {})", generation);
        self.active = Some(Activation {
            generation,
            commands,
            cancel,
        });
    }

    fn subscribe(
        &mut self,
        id: &str,
        destination: &str,
        headers: Headers,
    ) -> Result<(), LinkClosed> {
        self.command(Outbound::Subscribe {
            id: id.to_string(),
            destination: destination.to_string(),
            headers,
        })
    }

    fn unsubscribe(&mut self, id: &str) -> Result<(), LinkClosed> {
        self.command(Outbound::Unsubscribe { id: id.to_string() })
    }

    fn publish(
        &mut self,
        destination: &str,
        headers: Headers,
        body: String,
    ) -> Result<(), LinkClosed> {
        self.command(Outbound::Send {
            destination: destination.to_string(),
            headers,
            body,
        })
    }

    fn deactivate(&mut self) {
        if let Some(active) = self.active.take() {
            crate::log_debug!("STOMP link deactivated (generation {})", active.generation);
            active.cancel.cancel();
        }
    }
}

impl<C: Connector> Drop for StompClient<C> {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[derive(Debug, Clone)]
struct Subscription {
    id: String,
    destination: String,
    headers: Headers,
}

impl Subscription {
    fn frame(&self) -> Frame {
        Frame::new(Command::Subscribe)
            .with_header(HEADER_ID, self.id.clone())
            .with_header(HEADER_DESTINATION, self.destination.clone())
            .with_headers(self.headers.clone())
    }
}

enum Outcome {
    Cancelled,
    Failed(String),
    Rejected(String),
    Lost(String),
}

enum Handshake {
    Connected(Frame, Vec<Result<Incoming, FrameError>>),
    Rejected(String),
    Closed(String),
    TimedOut,
    Cancelled,
}

struct ConnectionTask<C: Connector> {
    connector: Arc<C>,
    options: StompOptions,
    generation: Generation,
    connect_headers: Headers,
    commands: UnboundedReceiver<Outbound>,
    events: UnboundedSender<LinkEvent>,
    cancel: CancellationToken,
    /// Replayed after every reconnect.
    subscriptions: Vec<Subscription>,
}

impl<C: Connector> ConnectionTask<C> {
    async fn run(mut self) {
        loop {
            match self.connect_once().await {
                Outcome::Cancelled => break,
                Outcome::Failed(reason) => {
                    crate::log_warn!("STOMP connection failed: {}", reason);
                    self.emit(LinkEventKind::TransportFailed { reason });
                }
                Outcome::Rejected(message) => {
                    crate::log_error!("STOMP error: {}", message);
                    self.emit(LinkEventKind::StompError { message });
                }
                Outcome::Lost(reason) => {
                    crate::log_warn!("STOMP connection lost: {}", reason);
                    self.emit(LinkEventKind::Disconnected { reason });
                }
            }

            if self.options.reconnect_delay.is_zero() {
                crate::log_info!("Reconnect disabled, stopping link");
                break;
            }

            crate::log_info!(
                "Reconnecting in {}ms (generation {})",
                self.options.reconnect_delay.as_millis(),
                self.generation
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.options.reconnect_delay) => {}
            }
        }
        crate::log_debug!("STOMP connection task stopped (generation {})", self.generation);
    }

    fn emit(&self, kind: LinkEventKind) {
        if self.cancel.is_cancelled() {
            return;
        }
        let event = LinkEvent {
            generation: self.generation,
            kind,
        };
        if self.events.send(event).is_err() {
            crate::log_debug!("Link event receiver dropped");
        }
    }

    async fn connect_once(&mut self) -> Outcome {
        // Not a child of `self.cancel`: on deactivation the DISCONNECT frame
        // is queued before the transport is told to stop.
        let transport_cancel = CancellationToken::new();
        let _transport_guard = transport_cancel.clone().drop_guard();

        let opened = tokio::select! {
            _ = self.cancel.cancelled() => return Outcome::Cancelled,
            opened = self.connector.open(transport_cancel.clone()) => opened,
        };
        let TransportLink {
            kind,
            outgoing,
            mut incoming,
        } = match opened {
            Ok(link) => link,
            Err(e) => return Outcome::Failed(e.to_string()),
        };
        crate::log_debug!("Transport {} open, sending CONNECT", kind);

        let connect = Frame::new(Command::Connect)
            .with_header(HEADER_ACCEPT_VERSION, ACCEPT_VERSION)
            .with_header(HEADER_HEART_BEAT, self.options.heartbeat.to_header())
            .with_headers(self.connect_headers.clone());
        if outgoing.send(connect.encode()).is_err() {
            return Outcome::Failed("transport closed before CONNECT".to_string());
        }

        let mut parser = FrameParser::new();
        let (connected, leftover) = match self.handshake(&mut incoming, &mut parser).await {
            Handshake::Connected(frame, leftover) => (frame, leftover),
            Handshake::Rejected(message) => return Outcome::Rejected(message),
            Handshake::Closed(reason) => return Outcome::Failed(reason),
            Handshake::TimedOut => {
                return Outcome::Failed("timed out waiting for CONNECTED".to_string())
            }
            Handshake::Cancelled => return Outcome::Cancelled,
        };

        let server_heartbeat = connected
            .header(HEADER_HEART_BEAT)
            .and_then(HeartBeat::parse)
            .unwrap_or_default();
        let negotiated = self.options.heartbeat.negotiate(server_heartbeat);
        crate::log_info!(
            "STOMP connected (version {}, heart-beat {:?})",
            connected.header("version").unwrap_or("1.0"),
            negotiated
        );
        self.emit(LinkEventKind::Connected {
            server: connected.header("server").map(str::to_string),
            version: connected.header("version").map(str::to_string),
        });

        for subscription in &self.subscriptions {
            crate::log_debug!("Replaying subscription {}", subscription.id);
            if outgoing.send(subscription.frame().encode()).is_err() {
                return Outcome::Lost("transport closed".to_string());
            }
        }
        for item in leftover {
            self.handle_incoming(item);
        }

        self.pump(&outgoing, &mut incoming, &mut parser, negotiated)
            .await
    }

    async fn handshake(
        &self,
        incoming: &mut UnboundedReceiver<TransportEvent>,
        parser: &mut FrameParser,
    ) -> Handshake {
        let deadline = self.options.connect_timeout.map(|t| Instant::now() + t);
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => return Handshake::Cancelled,
                _ = sleep_until(deadline) => return Handshake::TimedOut,
                event = incoming.recv() => event,
            };
            match event {
                Some(TransportEvent::Message(chunk)) => {
                    let mut items = parser.push(&chunk).into_iter();
                    while let Some(item) = items.next() {
                        match item {
                            Ok(Incoming::Frame(frame)) if frame.command == Command::Connected => {
                                return Handshake::Connected(frame, items.collect());
                            }
                            Ok(Incoming::Frame(frame)) if frame.command == Command::Error => {
                                return Handshake::Rejected(error_message(&frame));
                            }
                            Ok(Incoming::Frame(frame)) => {
                                crate::log_warn!("Ignoring {} frame before CONNECTED", frame.command)
                            }
                            Ok(Incoming::Heartbeat) => {}
                            Err(e) => crate::log_warn!("Dropping malformed STOMP frame: {}", e),
                        }
                    }
                }
                Some(TransportEvent::Closed { code, reason }) => {
                    return Handshake::Closed(describe_close(code, &reason))
                }
                None => return Handshake::Closed("transport ended".to_string()),
            }
        }
    }

    async fn pump(
        &mut self,
        outgoing: &UnboundedSender<String>,
        incoming: &mut UnboundedReceiver<TransportEvent>,
        parser: &mut FrameParser,
        heartbeat: NegotiatedHeartBeat,
    ) -> Outcome {
        let mut send_tick = heartbeat.send_every.map(interval);
        let mut watchdog = heartbeat.expect_every.map(interval);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    let _ = outgoing.send(Frame::new(Command::Disconnect).encode());
                    return Outcome::Cancelled;
                }
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        let _ = outgoing.send(Frame::new(Command::Disconnect).encode());
                        return Outcome::Cancelled;
                    };
                    let frame = self.apply(command);
                    if outgoing.send(frame.encode()).is_err() {
                        return Outcome::Lost("transport closed".to_string());
                    }
                }
                event = incoming.recv() => match event {
                    Some(TransportEvent::Message(chunk)) => {
                        last_seen = Instant::now();
                        for item in parser.push(&chunk) {
                            self.handle_incoming(item);
                        }
                    }
                    Some(TransportEvent::Closed { code, reason }) => {
                        return Outcome::Lost(describe_close(code, &reason));
                    }
                    None => return Outcome::Lost("transport ended".to_string()),
                },
                _ = tick(&mut send_tick) => {
                    if outgoing.send("\n".to_string()).is_err() {
                        return Outcome::Lost("transport closed".to_string());
                    }
                }
                _ = tick(&mut watchdog) => {
                    if let Some(expected) = heartbeat.expect_every {
                        if last_seen.elapsed() > expected * 2 {
                            return Outcome::Lost("no heart-beat from server".to_string());
                        }
                    }
                }
            }
        }
    }

    /// Record the command in the replay registry and build its frame.
    fn apply(&mut self, command: Outbound) -> Frame {
        match command {
            Outbound::Subscribe {
                id,
                destination,
                headers,
            } => {
                self.subscriptions.retain(|s| s.id != id);
                let subscription = Subscription {
                    id,
                    destination,
                    headers,
                };
                let frame = subscription.frame();
                self.subscriptions.push(subscription);
                frame
            }
            Outbound::Unsubscribe { id } => {
                self.subscriptions.retain(|s| s.id != id);
                Frame::new(Command::Unsubscribe).with_header(HEADER_ID, id)
            }
            Outbound::Send {
                destination,
                headers,
                body,
            } => Frame::new(Command::Send)
                .with_header(HEADER_DESTINATION, destination)
                .with_headers(headers)
                .with_body(body),
        }
    }

    fn handle_incoming(&self, item: Result<Incoming, FrameError>) {
        let frame = match item {
            Ok(Incoming::Frame(frame)) => frame,
            Ok(Incoming::Heartbeat) => return,
            Err(e) => {
                crate::log_warn!("Dropping malformed STOMP frame: {}", e);
                return;
            }
        };
        match frame.command {
            Command::Message => {
                let subscription = frame.header(HEADER_SUBSCRIPTION).unwrap_or_default();
                let destination = frame.header(HEADER_DESTINATION).unwrap_or_default();
                self.emit(LinkEventKind::Message {
                    subscription: subscription.to_string(),
                    destination: destination.to_string(),
                    body: frame.body.clone(),
                });
            }
            Command::Error => {
                let message = error_message(&frame);
                crate::log_error!("STOMP error: {}", message);
                self.emit(LinkEventKind::StompError { message });
            }
            Command::Receipt => {
                crate::log_debug!("Receipt {:?}", frame.header(HEADER_RECEIPT_ID));
            }
            other => crate::log_warn!("Ignoring unexpected {} frame", other),
        }
    }
}

fn error_message(frame: &Frame) -> String {
    match frame.header(HEADER_MESSAGE) {
        Some(message) => message.to_string(),
        None if !frame.body.is_empty() => frame.body.clone(),
        None => "unknown broker error".to_string(),
    }
}

fn describe_close(code: Option<u16>, reason: &str) -> String {
    match code {
        Some(code) => format!("closed ({code}): {reason}"),
        None => format!("closed: {reason}"),
    }
}

fn interval(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{TransportError, TransportKind};
    use async_trait::async_trait;
    use roomchat_shared::authorization_header;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const WAIT: Duration = Duration::from_secs(2);

    /// The broker's end of one in-memory transport.
    struct BrokerSide {
        from_client: UnboundedReceiver<String>,
        to_client: UnboundedSender<TransportEvent>,
    }

    impl BrokerSide {
        /// Next non-heart-beat frame written by the client.
        async fn recv_frame(&mut self) -> Frame {
            loop {
                let raw = tokio::time::timeout(WAIT, self.from_client.recv())
                    .await
                    .expect("client frame in time")
                    .expect("client side open");
                if raw.trim_matches('\n').is_empty() {
                    continue;
                }
                return Frame::decode(&raw).expect("valid frame");
            }
        }

        fn reply(&self, frame: Frame) {
            self.to_client
                .send(TransportEvent::Message(frame.encode()))
                .unwrap();
        }

        fn close(&self, reason: &str) {
            // The client may already have dropped its end.
            let _ = self.to_client.send(TransportEvent::Closed {
                code: Some(1006),
                reason: reason.to_string(),
            });
        }
    }

    struct MemoryConnector {
        opened: UnboundedSender<BrokerSide>,
        refusals: AtomicUsize,
    }

    impl MemoryConnector {
        fn new(refusals: usize) -> (Self, UnboundedReceiver<BrokerSide>) {
            let (opened, brokers) = mpsc::unbounded_channel();
            (
                Self {
                    opened,
                    refusals: AtomicUsize::new(refusals),
                },
                brokers,
            )
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn open(&self, _cancel: CancellationToken) -> Result<TransportLink, TransportError> {
            if self
                .refusals
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(TransportError::Exhausted("connection refused".to_string()));
            }
            let (outgoing, from_client) = mpsc::unbounded_channel();
            let (to_client, incoming) = mpsc::unbounded_channel();
            let _ = self.opened.send(BrokerSide {
                from_client,
                to_client,
            });
            Ok(TransportLink {
                kind: TransportKind::WebSocket,
                outgoing,
                incoming,
            })
        }
    }

    impl BrokerSide {
        /// Next raw write from the client, heart-beats included.
        async fn recv_raw(&mut self, wait: Duration) -> String {
            tokio::time::timeout(wait, self.from_client.recv())
                .await
                .expect("client write in time")
                .expect("client side open")
        }

        fn send_raw(&self, raw: &str) {
            self.to_client
                .send(TransportEvent::Message(raw.to_string()))
                .unwrap();
        }
    }

    fn options(reconnect_ms: u64) -> StompOptions {
        StompOptions {
            heartbeat: HeartBeat::new(0, 0),
            reconnect_delay: Duration::from_millis(reconnect_ms),
            connect_timeout: None,
        }
    }

    async fn next<T>(rx: &mut UnboundedReceiver<T>) -> T {
        tokio::time::timeout(WAIT, rx.recv())
            .await
            .expect("item in time")
            .expect("channel open")
    }

    async fn connected_client(
        reconnect_ms: u64,
    ) -> (
        StompClient<MemoryConnector>,
        UnboundedReceiver<LinkEvent>,
        UnboundedReceiver<BrokerSide>,
        BrokerSide,
    ) {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (connector, mut brokers) = MemoryConnector::new(0);
        let mut client = StompClient::new(connector, options(reconnect_ms), events_tx);
        client.activate(1, vec![authorization_header("tok1")]);

        let mut broker = next(&mut brokers).await;
        let connect = broker.recv_frame().await;
        assert_eq!(connect.command, Command::Connect);
        broker.reply(Frame::new(Command::Connected).with_header("version", "1.2"));

        let event = next(&mut events).await;
        assert!(matches!(event.kind, LinkEventKind::Connected { .. }));
        (client, events, brokers, broker)
    }

    #[tokio::test]
    async fn handshake_carries_bearer_token() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (connector, mut brokers) = MemoryConnector::new(0);
        let mut client = StompClient::new(connector, options(0), events_tx);
        client.activate(7, vec![authorization_header("tok1")]);

        let mut broker = next(&mut brokers).await;
        let connect = broker.recv_frame().await;
        assert_eq!(connect.command, Command::Connect);
        assert_eq!(connect.header("Authorization"), Some("Bearer tok1"));
        assert_eq!(connect.header("accept-version"), Some("1.2,1.1,1.0"));
        assert_eq!(connect.header("heart-beat"), Some("0,0"));

        broker.reply(
            Frame::new(Command::Connected)
                .with_header("version", "1.2")
                .with_header("server", "test-broker"),
        );
        assert_eq!(
            next(&mut events).await,
            LinkEvent {
                generation: 7,
                kind: LinkEventKind::Connected {
                    server: Some("test-broker".to_string()),
                    version: Some("1.2".to_string()),
                },
            }
        );
        assert!(client.is_active());
    }

    #[tokio::test]
    async fn subscribe_is_written_before_publish_and_messages_come_back() {
        let (mut client, mut events, _brokers, mut broker) = connected_client(0).await;

        client
            .subscribe("sub-0", "/sub/room/lobby", vec![authorization_header("tok1")])
            .unwrap();
        client
            .publish(
                "/pub/chat/lobby-message",
                vec![authorization_header("tok1")],
                "{}".to_string(),
            )
            .unwrap();

        let subscribe = broker.recv_frame().await;
        assert_eq!(subscribe.command, Command::Subscribe);
        assert_eq!(subscribe.header("id"), Some("sub-0"));
        assert_eq!(subscribe.header("destination"), Some("/sub/room/lobby"));
        assert_eq!(subscribe.header("Authorization"), Some("Bearer tok1"));

        let send = broker.recv_frame().await;
        assert_eq!(send.command, Command::Send);
        assert_eq!(send.header("destination"), Some("/pub/chat/lobby-message"));
        assert_eq!(send.body, "{}");

        broker.reply(
            Frame::new(Command::Message)
                .with_header("subscription", "sub-0")
                .with_header("destination", "/sub/room/lobby")
                .with_body("payload"),
        );
        assert_eq!(
            next(&mut events).await.kind,
            LinkEventKind::Message {
                subscription: "sub-0".to_string(),
                destination: "/sub/room/lobby".to_string(),
                body: "payload".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn error_during_handshake_is_reported() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (connector, mut brokers) = MemoryConnector::new(0);
        let mut client = StompClient::new(connector, options(0), events_tx);
        client.activate(1, vec![authorization_header("bad")]);

        let mut broker = next(&mut brokers).await;
        broker.recv_frame().await;
        broker.reply(Frame::new(Command::Error).with_header("message", "invalid token"));

        assert_eq!(
            next(&mut events).await.kind,
            LinkEventKind::StompError {
                message: "invalid token".to_string()
            }
        );
    }

    #[tokio::test]
    async fn refused_transport_is_reported() {
        let (events_tx, mut events) = mpsc::unbounded_channel();
        let (connector, _brokers) = MemoryConnector::new(1);
        let mut client = StompClient::new(connector, options(0), events_tx);
        client.activate(3, Vec::new());

        let event = next(&mut events).await;
        assert_eq!(event.generation, 3);
        assert!(matches!(event.kind, LinkEventKind::TransportFailed { .. }));
    }

    #[tokio::test]
    async fn reconnect_replays_subscriptions() {
        let (mut client, mut events, mut brokers, mut broker) = connected_client(10).await;
        client
            .subscribe("sub-0", "/sub/room/lobby", Vec::new())
            .unwrap();
        assert_eq!(broker.recv_frame().await.command, Command::Subscribe);

        broker.close("network hiccup");
        assert!(matches!(
            next(&mut events).await.kind,
            LinkEventKind::Disconnected { .. }
        ));

        let mut broker = next(&mut brokers).await;
        assert_eq!(broker.recv_frame().await.command, Command::Connect);
        broker.reply(Frame::new(Command::Connected));
        assert!(matches!(
            next(&mut events).await.kind,
            LinkEventKind::Connected { .. }
        ));

        let replay = broker.recv_frame().await;
        assert_eq!(replay.command, Command::Subscribe);
        assert_eq!(replay.header("id"), Some("sub-0"));
    }

    #[tokio::test]
    async fn unsubscribed_destinations_are_not_replayed() {
        let (mut client, mut events, mut brokers, mut broker) = connected_client(10).await;
        client.subscribe("sub-0", "/sub/room/a", Vec::new()).unwrap();
        client.unsubscribe("sub-0").unwrap();
        client.subscribe("sub-1", "/sub/room/b", Vec::new()).unwrap();
        for _ in 0..3 {
            broker.recv_frame().await;
        }

        broker.close("bye");
        next(&mut events).await;
        let mut broker = next(&mut brokers).await;
        broker.recv_frame().await;
        broker.reply(Frame::new(Command::Connected));
        next(&mut events).await;

        let replay = broker.recv_frame().await;
        assert_eq!(replay.header("id"), Some("sub-1"));
    }

    #[tokio::test]
    async fn deactivate_sends_disconnect_and_closes_link() {
        let (mut client, mut events, _brokers, mut broker) = connected_client(0).await;
        client.deactivate();

        assert_eq!(broker.recv_frame().await.command, Command::Disconnect);
        assert_eq!(
            client.publish("/pub/x", Vec::new(), String::new()),
            Err(LinkClosed)
        );
        assert!(!client.is_active());

        broker.close("bye");
        let late = tokio::time::timeout(Duration::from_millis(100), events.recv()).await;
        assert!(!matches!(late, Ok(Some(_))));
    }

    #[tokio::test]
    async fn oversized_frame_does_not_stop_the_link() {
        let (_client, mut events, mut brokers, broker) = connected_client(10).await;

        broker.send_raw("MESSAGE\ncontent-length:18446744073709551615\n\nx\0");
        broker.reply(
            Frame::new(Command::Message)
                .with_header("subscription", "sub-0")
                .with_body("after"),
        );
        assert!(matches!(
            next(&mut events).await.kind,
            LinkEventKind::Message { body, .. } if body == "after"
        ));

        broker.close("bye");
        assert!(matches!(
            next(&mut events).await.kind,
            LinkEventKind::Disconnected { .. }
        ));
        let mut broker = next(&mut brokers).await;
        assert_eq!(broker.recv_frame().await.command, Command::Connect);
    }

    async fn paused_client(
        options: StompOptions,
    ) -> (
        StompClient<MemoryConnector>,
        UnboundedReceiver<LinkEvent>,
        BrokerSide,
    ) {
        let (events_tx, events) = mpsc::unbounded_channel();
        let (connector, mut brokers) = MemoryConnector::new(0);
        let mut client = StompClient::new(connector, options, events_tx);
        client.activate(1, Vec::new());
        let mut broker = next(&mut brokers).await;
        assert_eq!(broker.recv_frame().await.command, Command::Connect);
        (client, events, broker)
    }

    #[tokio::test(start_paused = true)]
    async fn heart_beats_are_sent_at_the_negotiated_interval() {
        let (_client, mut events, mut broker) = paused_client(StompOptions {
            heartbeat: HeartBeat::new(1000, 0),
            ..options(0)
        })
        .await;
        broker.reply(Frame::new(Command::Connected).with_header("heart-beat", "0,500"));
        next(&mut events).await;

        let start = Instant::now();
        assert_eq!(broker.recv_raw(WAIT).await, "\n");
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert_eq!(broker.recv_raw(WAIT).await, "\n");
        assert!(start.elapsed() >= Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_server_is_declared_dead() {
        let (_client, mut events, broker) = paused_client(StompOptions {
            heartbeat: HeartBeat::new(0, 1000),
            ..options(0)
        })
        .await;
        broker.reply(Frame::new(Command::Connected).with_header("heart-beat", "500,0"));
        next(&mut events).await;

        let start = Instant::now();
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("watchdog fired")
            .expect("channel open");
        assert_eq!(
            event.kind,
            LinkEventKind::Disconnected {
                reason: "no heart-beat from server".to_string()
            }
        );
        assert!(start.elapsed() > Duration::from_millis(2000));
        drop(broker);
    }

    #[tokio::test(start_paused = true)]
    async fn server_heart_beats_keep_the_link_up() {
        let (_client, mut events, broker) = paused_client(StompOptions {
            heartbeat: HeartBeat::new(0, 1000),
            ..options(0)
        })
        .await;
        broker.reply(Frame::new(Command::Connected).with_header("heart-beat", "1000,0"));
        next(&mut events).await;

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_millis(900)).await;
            broker.send_raw("\n");
        }
        let quiet = tokio::time::timeout(Duration::from_millis(500), events.recv()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_times_out() {
        let (_client, mut events, broker) = paused_client(StompOptions {
            connect_timeout: Some(Duration::from_millis(500)),
            ..options(0)
        })
        .await;

        let event = next(&mut events).await;
        assert_eq!(
            event.kind,
            LinkEventKind::TransportFailed {
                reason: "timed out waiting for CONNECTED".to_string()
            }
        );
        drop(broker);
    }
}
