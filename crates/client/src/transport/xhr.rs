//! SockJS HTTP fallbacks: `xhr_streaming` and `xhr` (polling).
//!
//! Both receive newline-separated SockJS frames in POST responses and send
//! through `xhr_send`. Streaming keeps one chunked response open and reissues
//! it when the server ends it; polling issues one request per batch.

use std::collections::VecDeque;

use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use roomchat_shared::sockjs::encode_messages;
use roomchat_shared::SockJsFrame;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{dispatch, SessionUrl, TransportError, TransportEvent, TransportKind, TransportLink};

pub(super) async fn open(
    kind: TransportKind,
    session: &SessionUrl,
    http: reqwest::Client,
    cancel: CancellationToken,
) -> Result<TransportLink, TransportError> {
    let receive_url = session.transport_url(kind.path());
    let send_url = session.transport_url("xhr_send");
    let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

    match kind {
        TransportKind::XhrStreaming => {
            let mut reader = StreamReader::start(&http, receive_url.clone()).await?;
            expect_open(reader.next_frame().await?)?;
            tokio::spawn(streaming_loop(
                reader,
                http.clone(),
                receive_url,
                in_tx.clone(),
                cancel.clone(),
            ));
        }
        TransportKind::XhrPolling => {
            let mut frames = poll_once(&http, receive_url.clone()).await?.into_iter();
            expect_open(frames.next())?;
            for frame in frames {
                dispatch(frame, &in_tx);
            }
            tokio::spawn(polling_loop(
                http.clone(),
                receive_url,
                in_tx.clone(),
                cancel.clone(),
            ));
        }
        TransportKind::WebSocket => {
            return Err(TransportError::UnknownKind(kind.to_string()));
        }
    }

    let outgoing = spawn_sender(http, send_url, in_tx, cancel);
    Ok(TransportLink {
        kind,
        outgoing,
        incoming: in_rx,
    })
}

fn expect_open(frame: Option<SockJsFrame>) -> Result<(), TransportError> {
    match frame {
        Some(SockJsFrame::Open) => Ok(()),
        other => Err(TransportError::NotOpened(format!("{other:?}"))),
    }
}

fn parse_line(line: &str) -> Option<SockJsFrame> {
    let line = line.trim_end_matches('\r');
    // Streaming responses start with a 2048 byte `hhh…h` prelude.
    if line.is_empty() || (line.len() > 1 && line.bytes().all(|b| b == b'h')) {
        return None;
    }
    match SockJsFrame::parse(line) {
        Ok(frame) => Some(frame),
        Err(e) => {
            crate::log_warn!("Dropping SockJS frame: {}", e);
            None
        }
    }
}

async fn poll_once(http: &reqwest::Client, url: Url) -> Result<Vec<SockJsFrame>, TransportError> {
    let body = http
        .post(url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(body.lines().filter_map(parse_line).collect())
}

async fn polling_loop(
    http: reqwest::Client,
    url: Url,
    incoming: UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        let polled = tokio::select! {
            _ = cancel.cancelled() => return,
            polled = poll_once(&http, url.clone()) => polled,
        };
        match polled {
            Ok(frames) => {
                for frame in frames {
                    if !dispatch(frame, &incoming) {
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = incoming.send(TransportEvent::Closed {
                    code: None,
                    reason: format!("xhr poll failed: {e}"),
                });
                return;
            }
        }
    }
}

/// Splits a chunked response body into SockJS frames.
struct StreamReader {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    pending: Vec<u8>,
    lines: VecDeque<String>,
}

impl StreamReader {
    async fn start(http: &reqwest::Client, url: Url) -> Result<Self, TransportError> {
        let response = http.post(url).send().await?.error_for_status()?;
        Ok(Self {
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
            pending: Vec::new(),
            lines: VecDeque::new(),
        })
    }

    /// Next frame, or `None` once the server ended the response.
    async fn next_frame(&mut self) -> Result<Option<SockJsFrame>, TransportError> {
        loop {
            while let Some(line) = self.lines.pop_front() {
                if let Some(frame) = parse_line(&line) {
                    return Ok(Some(frame));
                }
            }
            match self.body.next().await {
                Some(chunk) => self.feed(&chunk?),
                None => return Ok(None),
            }
        }
    }

    fn feed(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
        while let Some(nl) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=nl).collect();
            self.lines
                .push_back(String::from_utf8_lossy(&line[..nl]).into_owned());
        }
    }
}

async fn streaming_loop(
    mut reader: StreamReader,
    http: reqwest::Client,
    url: Url,
    incoming: UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = reader.next_frame() => next,
        };
        match next {
            Ok(Some(frame)) => {
                if !dispatch(frame, &incoming) {
                    return;
                }
            }
            Ok(None) => {
                crate::log_debug!("xhr_streaming response ended, reissuing");
                let restarted = tokio::select! {
                    _ = cancel.cancelled() => return,
                    restarted = StreamReader::start(&http, url.clone()) => restarted,
                };
                match restarted {
                    Ok(next_reader) => reader = next_reader,
                    Err(e) => {
                        let _ = incoming.send(TransportEvent::Closed {
                            code: None,
                            reason: format!("xhr_streaming failed: {e}"),
                        });
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = incoming.send(TransportEvent::Closed {
                    code: None,
                    reason: format!("xhr_streaming failed: {e}"),
                });
                return;
            }
        }
    }
}

/// Batches queued frames into `xhr_send` requests. A failed send closes the
/// session from the link's point of view.
fn spawn_sender(
    http: reqwest::Client,
    url: Url,
    incoming: UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) -> UnboundedSender<String> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                biased;
                next = rx.recv() => next,
                _ = cancel.cancelled() => None,
            };
            let Some(first) = next else {
                break;
            };
            let mut batch = vec![first];
            while let Ok(more) = rx.try_recv() {
                batch.push(more);
            }
            let sent = http
                .post(url.clone())
                .header(CONTENT_TYPE, "text/plain;charset=UTF-8")
                .body(encode_messages(&batch))
                .send()
                .await
                .and_then(|response| response.error_for_status());
            if let Err(e) = sent {
                crate::log_error!("xhr_send failed: {}", e);
                let _ = incoming.send(TransportEvent::Closed {
                    code: None,
                    reason: format!("xhr_send failed: {e}"),
                });
                break;
            }
        }
    });
    tx
}
