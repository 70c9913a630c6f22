//! SockJS transports.
//!
//! A transport moves STOMP frame text between the client and the broker. The
//! [`Connector`] trait is the seam between the STOMP link and the network:
//! [`SockJsConnector`] queries `{endpoint}/info`, then tries each configured
//! transport in order until one opens a session.
//!
//! ```text
//!   StompClient ──outgoing (String)──▶ transport tasks ──▶ broker
//!               ◀─incoming (TransportEvent)──────────────◀
//! ```

#[cfg(test)]
mod testing;
mod websocket;
mod xhr;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use roomchat_shared::{SockJsError, SockJsFrame, SockJsInfo};
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ClientConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    WebSocket,
    XhrStreaming,
    XhrPolling,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::XhrStreaming => "xhr-streaming",
            TransportKind::XhrPolling => "xhr-polling",
        }
    }

    /// Last path segment of the receiving URL.
    fn path(self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::XhrStreaming => "xhr_streaming",
            TransportKind::XhrPolling => "xhr",
        }
    }
}

impl FromStr for TransportKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "websocket" => Ok(TransportKind::WebSocket),
            "xhr-streaming" | "xhr_streaming" => Ok(TransportKind::XhrStreaming),
            "xhr-polling" | "xhr_polling" | "xhr" => Ok(TransportKind::XhrPolling),
            _ => Err(TransportError::UnknownKind(s.to_string())),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown transport `{0}`")]
    UnknownKind(String),
    #[error("invalid endpoint URL: {0}")]
    Url(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    SockJs(#[from] SockJsError),
    #[error("server did not open the session: {0}")]
    NotOpened(String),
    #[error("no usable transport ({0})")]
    Exhausted(String),
}

/// Something that arrived from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One SockJS message, usually one STOMP frame or a heart-beat EOL.
    Message(String),
    /// The session ended. No further events follow.
    Closed { code: Option<u16>, reason: String },
}

/// An open SockJS session. Dropping `outgoing` or cancelling the token the
/// transport was opened with shuts it down.
#[derive(Debug)]
pub struct TransportLink {
    pub kind: TransportKind,
    pub outgoing: UnboundedSender<String>,
    pub incoming: UnboundedReceiver<TransportEvent>,
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new session. Background tasks spawned for it stop when `cancel`
    /// fires.
    async fn open(&self, cancel: CancellationToken) -> Result<TransportLink, TransportError>;
}

/// Where a SockJS session lives: `{endpoint}/{server_id}/{session_id}/…`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUrl {
    endpoint: Url,
    server_id: String,
    session_id: String,
}

impl SessionUrl {
    /// Random server id (three digits) and session id (eight lowercase
    /// alphanumerics).
    pub fn generate(endpoint: &Url) -> Self {
        let mut rng = rand::thread_rng();
        let server_id = format!("{:03}", rng.gen_range(0..1000));
        let session_id: String = (&mut rng)
            .sample_iter(&Alphanumeric)
            .take(8)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        Self::with_ids(endpoint, server_id, session_id)
    }

    pub fn with_ids(endpoint: &Url, server_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.clone(),
            server_id: server_id.into(),
            session_id: session_id.into(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transport_url(&self, suffix: &str) -> Url {
        let mut url = self.endpoint.clone();
        let base = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!(
            "{}/{}/{}/{}",
            base, self.server_id, self.session_id, suffix
        ));
        url
    }
}

/// `{endpoint}/info?t=<millis>`; the timestamp defeats HTTP caches.
pub fn info_url(endpoint: &Url) -> Url {
    let mut url = endpoint.clone();
    let base = url.path().trim_end_matches('/').to_string();
    url.set_path(&format!("{base}/info"));
    url.query_pairs_mut()
        .append_pair("t", &Utc::now().timestamp_millis().to_string());
    url
}

/// Forward one SockJS frame to the link. Returns `false` once the server has
/// closed the session or the link is gone.
fn dispatch(frame: SockJsFrame, incoming: &UnboundedSender<TransportEvent>) -> bool {
    match frame {
        SockJsFrame::Open => {
            crate::log_debug!("Ignoring repeated SockJS open frame");
            true
        }
        SockJsFrame::Heartbeat => true,
        SockJsFrame::Messages(messages) => messages
            .into_iter()
            .all(|m| incoming.send(TransportEvent::Message(m)).is_ok()),
        SockJsFrame::Close { code, reason } => {
            let _ = incoming.send(TransportEvent::Closed {
                code: Some(code),
                reason,
            });
            false
        }
    }
}

/// Connects through SockJS with transport fallback.
pub struct SockJsConnector {
    endpoint: Url,
    transports: Vec<TransportKind>,
    http: reqwest::Client,
}

impl SockJsConnector {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .cookie_store(config.with_credentials)
            .build()?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            transports: config.transports.clone(),
            http,
        })
    }

    async fn fetch_info(&self) -> Result<SockJsInfo, TransportError> {
        let url = info_url(&self.endpoint);
        crate::log_debug!("Fetching SockJS info from {}", url);
        let info = self
            .http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json::<SockJsInfo>()
            .await?;
        Ok(info)
    }
}

#[async_trait]
impl Connector for SockJsConnector {
    async fn open(&self, cancel: CancellationToken) -> Result<TransportLink, TransportError> {
        let info = self.fetch_info().await?;
        let mut failures = Vec::new();

        for &kind in &self.transports {
            if kind == TransportKind::WebSocket && !info.websocket {
                crate::log_debug!("Server disabled WebSocket, skipping");
                continue;
            }

            let session = SessionUrl::generate(&self.endpoint);
            let result = match kind {
                TransportKind::WebSocket => websocket::open(&session, cancel.clone()).await,
                TransportKind::XhrStreaming | TransportKind::XhrPolling => {
                    xhr::open(kind, &session, self.http.clone(), cancel.clone()).await
                }
            };

            match result {
                Ok(link) => {
                    crate::log_info!(
                        "SockJS session {} opened over {}",
                        session.session_id(),
                        kind
                    );
                    return Ok(link);
                }
                Err(e) => {
                    crate::log_warn!("{} transport failed: {}", kind, e);
                    failures.push(format!("{kind}: {e}"));
                }
            }
        }

        if failures.is_empty() {
            failures.push("no transport allowed by server".to_string());
        }
        Err(TransportError::Exhausted(failures.join("; ")))
    }
}
