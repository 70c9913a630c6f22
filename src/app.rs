//! Maps typed commands and session updates onto the chat session.

use std::io::{self, Write};

use roomchat_client::{ChatSession, Delivery, SessionUpdate, StompLink};
use roomchat_shared::InboundEvent;

use crate::cli::{Input, HELP};
use crate::ui::Screen;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct App<L: StompLink, W: Write> {
    pub session: ChatSession<L>,
    screen: Screen<W>,
    token: Option<String>,
    default_room: String,
    /// Whether the link retries on its own after losing the connection.
    reconnects: bool,
}

impl<L: StompLink, W: Write> App<L, W> {
    pub fn new(
        session: ChatSession<L>,
        screen: Screen<W>,
        token: Option<String>,
        default_room: impl Into<String>,
    ) -> Self {
        Self {
            session,
            screen,
            token,
            default_room: default_room.into(),
            reconnects: true,
        }
    }

    pub fn with_reconnect(mut self, reconnects: bool) -> Self {
        self.reconnects = reconnects;
        self
    }

    pub fn start(&mut self) -> io::Result<()> {
        self.screen.start()?;
        self.screen.status("type /help for commands")
    }

    pub fn handle(&mut self, input: Input) -> io::Result<Flow> {
        match input {
            Input::Connect(token) => {
                if let Some(token) = token {
                    self.token = Some(token);
                }
                let Some(token) = self.token.clone() else {
                    self.screen.status("usage: /connect <token>")?;
                    return Ok(Flow::Continue);
                };
                match self.session.begin_connect(&token) {
                    Ok(_) => self.screen.status("connecting...")?,
                    Err(e) => self.screen.status(e.to_string())?,
                }
            }
            Input::Subscribe(room) => {
                let room = room.unwrap_or_else(|| self.default_room.clone());
                match self.session.subscribe(&room) {
                    Ok(()) => self.screen.status(format!("joined {room}"))?,
                    Err(e) => self.screen.status(e.to_string())?,
                }
            }
            Input::Disconnect => {
                self.session.disconnect();
                self.screen.status("disconnected")?;
            }
            Input::Quit => {
                self.session.disconnect();
                return Ok(Flow::Quit);
            }
            Input::Help => {
                for line in HELP.lines() {
                    self.screen.status(line)?;
                }
            }
            Input::Say(text) => {
                let Some(room) = self.session.room().map(str::to_string) else {
                    if !text.trim().is_empty() {
                        self.screen.status("join a room first with /subscribe")?;
                    }
                    return Ok(Flow::Continue);
                };
                match self.session.send(&room, &text) {
                    Ok(Delivery::Published | Delivery::SkippedBlank) => {}
                    Err(e) => self.screen.status(e.to_string())?,
                }
            }
            Input::Unknown(name) => {
                self.screen
                    .status(format!("unknown command /{name}, try /help"))?;
            }
        }
        Ok(Flow::Continue)
    }

    pub fn on_update(&mut self, update: SessionUpdate) -> io::Result<()> {
        match update {
            SessionUpdate::Connected => {
                let line = format!("connected as {}", self.session.sender());
                self.screen.status(line)
            }
            SessionUpdate::ConnectFailed(e) => self.screen.status(format!("connect failed: {e}")),
            SessionUpdate::LinkLost { reason } if self.reconnects => self
                .screen
                .status(format!("connection lost ({reason}), reconnecting")),
            SessionUpdate::LinkLost { reason } => self
                .screen
                .status(format!("connection lost ({reason}), /connect to retry")),
            SessionUpdate::LinkRestored => self.screen.status("reconnected"),
            SessionUpdate::BrokerError { message } => {
                self.screen.status(format!("broker error: {message}"))
            }
        }
    }

    pub fn on_message(&mut self, event: &InboundEvent) -> io::Result<()> {
        self.screen.push(event)
    }

    #[cfg(test)]
    fn screen(&self) -> &Screen<W> {
        &self.screen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomchat_client::stomp::{Headers, LinkClosed};
    use roomchat_client::{Generation, LinkEvent, LinkEventKind};
    use roomchat_shared::{ChatMessage, Destinations};
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    /// Counts published frames.
    #[derive(Default)]
    struct CountingLink {
        published: Arc<Mutex<Vec<String>>>,
    }

    impl StompLink for CountingLink {
        fn activate(&mut self, _generation: Generation, _connect_headers: Headers) {}

        fn subscribe(&mut self, _id: &str, _dest: &str, _headers: Headers) -> Result<(), LinkClosed> {
            Ok(())
        }

        fn unsubscribe(&mut self, _id: &str) -> Result<(), LinkClosed> {
            Ok(())
        }

        fn publish(&mut self, _dest: &str, _headers: Headers, body: String) -> Result<(), LinkClosed> {
            self.published.lock().unwrap().push(body);
            Ok(())
        }

        fn deactivate(&mut self) {}
    }

    fn app() -> (App<CountingLink, Vec<u8>>, Arc<Mutex<Vec<String>>>) {
        let link = CountingLink::default();
        let published = link.published.clone();
        let (_events_tx, events_rx) = mpsc::unbounded_channel();
        let session = ChatSession::new(link, events_rx, "khg", Destinations::default());
        let app = App::new(session, Screen::new(Vec::new()), None, "lobby");
        (app, published)
    }

    fn output(app: &App<CountingLink, Vec<u8>>) -> String {
        String::from_utf8(app.screen().output().clone()).unwrap()
    }

    fn connect(app: &mut App<CountingLink, Vec<u8>>, token: &str) {
        app.handle(Input::Connect(Some(token.to_string()))).unwrap();
        let generation = app.session.generation();
        let update = app.session.handle_link_event(LinkEvent {
            generation,
            kind: LinkEventKind::Connected {
                server: None,
                version: None,
            },
        });
        app.on_update(update.unwrap()).unwrap();
    }

    #[test]
    fn connect_without_token_prints_usage() {
        let (mut app, _) = app();
        assert_eq!(app.handle(Input::Connect(None)).unwrap(), Flow::Continue);
        assert!(output(&app).contains("usage: /connect <token>"));
    }

    #[test]
    fn subscribe_uses_the_default_room_and_send_publishes() {
        let (mut app, published) = app();
        connect(&mut app, "tok1");
        app.handle(Input::Subscribe(None)).unwrap();
        app.handle(Input::Say("hello".to_string())).unwrap();
        app.handle(Input::Say("   ".to_string())).unwrap();

        assert_eq!(app.session.room(), Some("lobby"));
        let bodies = published.lock().unwrap().clone();
        assert_eq!(bodies.len(), 2);
        let chat = ChatMessage::from_body(&bodies[1]).unwrap();
        assert_eq!(chat.text(), "hello");
        assert!(output(&app).contains("* connected as khg\n* joined lobby\n"));
    }

    #[test]
    fn text_before_joining_is_not_sent() {
        let (mut app, published) = app();
        app.handle(Input::Say("hi".to_string())).unwrap();
        assert!(published.lock().unwrap().is_empty());
        assert!(output(&app).contains("join a room first"));
    }

    #[test]
    fn subscribe_while_disconnected_reports_state() {
        let (mut app, _) = app();
        app.handle(Input::Subscribe(Some("lobby".to_string())))
            .unwrap();
        assert!(output(&app).contains("session is not connected (state: disconnected)"));
    }

    #[test]
    fn quit_ends_the_loop() {
        let (mut app, _) = app();
        assert_eq!(app.handle(Input::Quit).unwrap(), Flow::Quit);
    }

    #[test]
    fn lost_link_message_follows_reconnect_policy() {
        let (mut retrying, _) = app();
        retrying
            .on_update(SessionUpdate::LinkLost {
                reason: "reset".to_string(),
            })
            .unwrap();
        assert!(output(&retrying).contains("* connection lost (reset), reconnecting\n"));

        let (manual, _) = app();
        let mut manual = manual.with_reconnect(false);
        manual
            .on_update(SessionUpdate::LinkLost {
                reason: "reset".to_string(),
            })
            .unwrap();
        let text = output(&manual);
        assert!(text.contains("* connection lost (reset), /connect to retry\n"));
        assert!(!text.contains("reconnecting"));
    }
}
