//! SockJS over a native WebSocket, using tokio-tungstenite.

use futures_util::{SinkExt, StreamExt};
use roomchat_shared::sockjs::encode_messages;
use roomchat_shared::SockJsFrame;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use super::{dispatch, SessionUrl, TransportError, TransportEvent, TransportKind, TransportLink};

pub(super) async fn open(
    session: &SessionUrl,
    cancel: CancellationToken,
) -> Result<TransportLink, TransportError> {
    let mut url = session.transport_url(TransportKind::WebSocket.path());
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| TransportError::Url(format!("cannot use {scheme} for {url}")))?;

    crate::log_debug!("Opening WebSocket {}", url);
    let (ws_stream, _response) = connect_async(url.as_str()).await?;
    let (mut write, mut read) = ws_stream.split();

    // The session is not usable until the server sends `o`.
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => match SockJsFrame::parse(text.as_str())? {
                SockJsFrame::Open => break,
                other => return Err(TransportError::NotOpened(format!("{other:?}"))),
            },
            Some(Ok(Message::Close(frame))) => {
                return Err(TransportError::NotOpened(format!("closed: {frame:?}")))
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => return Err(TransportError::NotOpened("stream ended".to_string())),
        }
    }

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

    // Read task
    let read_cancel = cancel.clone();
    tokio::spawn(async move {
        let closed = loop {
            let msg = tokio::select! {
                _ = read_cancel.cancelled() => break None,
                msg = read.next() => msg,
            };
            match msg {
                Some(Ok(Message::Text(text))) => match SockJsFrame::parse(text.as_str()) {
                    Ok(frame) => {
                        if !dispatch(frame, &in_tx) {
                            break None;
                        }
                    }
                    Err(e) => crate::log_warn!("Dropping SockJS frame: {}", e),
                },
                Some(Ok(Message::Close(frame))) => {
                    break Some(TransportEvent::Closed {
                        code: frame.as_ref().map(|f| u16::from(f.code)),
                        reason: frame
                            .map(|f| f.reason.as_str().to_string())
                            .unwrap_or_else(|| "close frame".to_string()),
                    });
                }
                Some(Ok(_)) => {
                    // Ping/pong are answered by tungstenite; binary is not used by SockJS.
                }
                Some(Err(e)) => {
                    break Some(TransportEvent::Closed {
                        code: None,
                        reason: e.to_string(),
                    })
                }
                None => {
                    break Some(TransportEvent::Closed {
                        code: None,
                        reason: "stream ended".to_string(),
                    })
                }
            }
        };
        if let Some(event) = closed {
            let _ = in_tx.send(event);
        }
    });

    // Write task. Queued frames win over cancellation so a final DISCONNECT
    // still goes out.
    tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                biased;
                next = out_rx.recv() => next,
                _ = cancel.cancelled() => None,
            };
            let Some(first) = next else {
                break;
            };
            let mut batch = vec![first];
            while let Ok(more) = out_rx.try_recv() {
                batch.push(more);
            }
            if let Err(e) = write.send(Message::text(encode_messages(&batch))).await {
                crate::log_error!("WebSocket send failed: {}", e);
                break;
            }
        }
        let _ = write.close().await;
    });

    Ok(TransportLink {
        kind: TransportKind::WebSocket,
        outgoing: out_tx,
        incoming: in_rx,
    })
}
