//! Scripted SockJS HTTP endpoint on a local socket.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use url::Url;

pub const INFO_NO_WEBSOCKET: &str =
    r#"{"websocket":false,"cookie_needed":false,"origins":["*:*"],"entropy":42}"#;

/// Answers `/info`, the receiving URLs and `xhr_send`.
///
/// Receive requests take the next scripted body; once the script runs out
/// they are held open without a response. Bodies posted to `xhr_send` are
/// forwarded to the returned receiver.
pub struct ScriptedServer {
    pub endpoint: Url,
    pub sent: UnboundedReceiver<String>,
}

impl ScriptedServer {
    pub async fn start(info: &str, receive: &[&str], send_status: u16) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let script: Arc<Mutex<VecDeque<String>>> =
            Arc::new(Mutex::new(receive.iter().map(|s| s.to_string()).collect()));
        let (sent_tx, sent) = mpsc::unbounded_channel();
        let info = info.to_string();

        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(respond(
                    socket,
                    info.clone(),
                    script.clone(),
                    send_status,
                    sent_tx.clone(),
                ));
            }
        });

        Self {
            endpoint: Url::parse(&format!("http://127.0.0.1:{port}/ws")).unwrap(),
            sent,
        }
    }
}

async fn respond(
    mut socket: TcpStream,
    info: String,
    script: Arc<Mutex<VecDeque<String>>>,
    send_status: u16,
    sent: UnboundedSender<String>,
) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let path = head.split_whitespace().nth(1).unwrap_or_default().to_string();
    let length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < head_end + length {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[head_end..head_end + length]).into_owned();

    let (status, reply) = if path.contains("/info") {
        (200, info)
    } else if path.ends_with("/xhr_send") {
        let _ = sent.send(body);
        (send_status, String::new())
    } else {
        let next = script.lock().unwrap().pop_front();
        match next {
            Some(reply) => (200, reply),
            None => return std::future::pending().await,
        }
    };

    let response = format!(
        "HTTP/1.1 {status} Scripted\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
        reply.len()
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}
