//! STOMP 1.2 frames: the model, the encoder and an incremental parser.
//!
//! A frame on the wire is a command line, header lines, a blank line, the body
//! and a NUL octet. Bare EOLs between frames are heart-beats.

use std::fmt;
use std::str::FromStr;

use crate::error::FrameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    // client
    Connect,
    Stomp,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Disconnect,
    // server
    Connected,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Ack => "ACK",
            Command::Nack => "NACK",
            Command::Disconnect => "DISCONNECT",
            Command::Connected => "CONNECTED",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
        }
    }

    /// CONNECT and CONNECTED headers are exchanged before the peers agree on
    /// a version, so they are never escaped.
    fn escapes_headers(self) -> bool {
        !matches!(self, Command::Connect | Command::Connected)
    }
}

impl FromStr for Command {
    type Err = FrameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "ACK" => Command::Ack,
            "NACK" => Command::Nack,
            "DISCONNECT" => Command::Disconnect,
            "CONNECTED" => Command::Connected,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame. Headers keep their wire order; repeated names are
/// allowed and the first occurrence wins on lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_headers<I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.headers.extend(headers);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Value of the first header named `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Serialize to wire text, NUL terminator included. A `content-length`
    /// header is added for non-empty bodies unless one is already present.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(32 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            push_header_part(&mut out, name, escape);
            out.push(':');
            push_header_part(&mut out, value, escape);
            out.push('\n');
        }
        if !self.body.is_empty() && self.header("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode exactly one frame. Leading EOLs are skipped.
    pub fn decode(raw: &str) -> Result<Frame, FrameError> {
        let bytes = raw.as_bytes();
        let start = bytes
            .iter()
            .position(|&b| b != b'\n' && b != b'\r')
            .unwrap_or(bytes.len());
        match parse_frame(&bytes[start..], MAX_FRAME_BYTES)? {
            Some((frame, _)) => Ok(frame),
            None => Err(FrameError::MissingTerminator),
        }
    }
}

fn push_header_part(out: &mut String, raw: &str, escape: bool) {
    if !escape {
        out.push_str(raw);
        return;
    }
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
}

fn unescape(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(FrameError::InvalidEscape(raw.to_string())),
        }
    }
    Ok(out)
}

/// Largest frame the parser accepts, headers and body included.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Parse one frame from the start of `bytes`. `Ok(None)` means more input is
/// needed. On success returns the frame and the number of bytes consumed.
fn parse_frame(bytes: &[u8], max_frame: usize) -> Result<Option<(Frame, usize)>, FrameError> {
    let mut idx = 0;
    let mut lines: Vec<&[u8]> = Vec::new();
    loop {
        let rest = &bytes[idx..];
        let Some(nl) = rest.iter().position(|&b| b == b'\n') else {
            if rest.contains(&0) {
                return Err(FrameError::MalformedHeader(lossy(rest)));
            }
            return Ok(None);
        };
        let mut line = &rest[..nl];
        if line.last() == Some(&b'\r') {
            line = &line[..line.len() - 1];
        }
        idx += nl + 1;
        if line.is_empty() {
            break;
        }
        if line.contains(&0) {
            return Err(FrameError::MalformedHeader(lossy(line)));
        }
        lines.push(line);
    }

    let Some((command_line, header_lines)) = lines.split_first() else {
        return Err(FrameError::UnknownCommand(String::new()));
    };
    let command: Command = utf8(command_line)?.parse()?;
    let escape = command.escapes_headers();

    let mut headers = Vec::with_capacity(header_lines.len());
    for line in header_lines {
        let text = utf8(line)?;
        let (name, value) = text
            .split_once(':')
            .ok_or_else(|| FrameError::MalformedHeader(text.to_string()))?;
        if escape {
            headers.push((unescape(name)?, unescape(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .map(|(_, v)| {
            v.trim()
                .parse::<usize>()
                .map_err(|_| FrameError::InvalidContentLength(v.clone()))
        })
        .transpose()?;

    let body_start = idx;
    let (body, consumed) = match content_length {
        Some(len) => {
            let end = match body_start.checked_add(len) {
                Some(end) if end < max_frame => end,
                _ => return Err(FrameError::InvalidContentLength(len.to_string())),
            };
            if bytes.len() <= end {
                return Ok(None);
            }
            if bytes[end] != 0 {
                return Err(FrameError::MissingTerminator);
            }
            (&bytes[body_start..end], end + 1)
        }
        None => {
            let Some(nul) = bytes[body_start..].iter().position(|&b| b == 0) else {
                return Ok(None);
            };
            let end = body_start + nul;
            if end >= max_frame {
                return Err(FrameError::TooLarge(end + 1));
            }
            (&bytes[body_start..end], end + 1)
        }
    };

    let body = String::from_utf8(body.to_vec()).map_err(|_| FrameError::InvalidUtf8)?;
    Ok(Some((
        Frame {
            command,
            headers,
            body,
        },
        consumed,
    )))
}

fn utf8(bytes: &[u8]) -> Result<&str, FrameError> {
    std::str::from_utf8(bytes).map_err(|_| FrameError::InvalidUtf8)
}

fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Something read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Frame(Frame),
    Heartbeat,
}

/// Incremental STOMP reader. Chunks may split or join frames arbitrarily.
///
/// Frames larger than the configured maximum are reported as errors and
/// skipped, so the held-back buffer never grows past that bound.
#[derive(Debug)]
pub struct FrameParser {
    buf: Vec<u8>,
    max_frame: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::with_max_frame(MAX_FRAME_BYTES)
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame,
        }
    }

    /// Feed a chunk and collect everything that became complete. A malformed
    /// frame is reported in place and skipped up to its NUL terminator so
    /// later frames still parse.
    pub fn push(&mut self, chunk: &str) -> Vec<Result<Incoming, FrameError>> {
        self.buf.extend_from_slice(chunk.as_bytes());
        let mut out = Vec::new();
        let mut pos = 0;
        loop {
            let eol_start = pos;
            while pos < self.buf.len() && matches!(self.buf[pos], b'\n' | b'\r') {
                pos += 1;
            }
            if pos > eol_start {
                out.push(Ok(Incoming::Heartbeat));
            }
            if pos >= self.buf.len() {
                break;
            }
            match parse_frame(&self.buf[pos..], self.max_frame) {
                Ok(Some((frame, used))) => {
                    out.push(Ok(Incoming::Frame(frame)));
                    pos += used;
                }
                Ok(None) if self.buf.len() - pos < self.max_frame => break,
                Ok(None) => {
                    out.push(Err(FrameError::TooLarge(self.buf.len() - pos)));
                    pos = self.skip_frame(pos);
                }
                Err(e) => {
                    out.push(Err(e));
                    pos = self.skip_frame(pos);
                }
            }
        }
        self.buf.drain(..pos);
        out
    }

    /// Position just past the next NUL, or the end of the buffer.
    fn skip_frame(&self, pos: usize) -> usize {
        match self.buf[pos..].iter().position(|&b| b == 0) {
            Some(nul) => pos + nul + 1,
            None => self.buf.len(),
        }
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
