//! Line renderer for the chat window.

use std::io::{self, Write};

use roomchat_client::MessageLog;
use roomchat_shared::InboundEvent;

pub const PLACEHOLDER: &str = "Chat history will appear here...";

/// Renders the message log incrementally and prints status lines.
pub struct Screen<W: Write> {
    out: W,
    log: MessageLog,
    rendered: usize,
}

impl<W: Write> Screen<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            log: MessageLog::new(),
            rendered: 0,
        }
    }

    /// Draw whatever the log holds, or the placeholder when it is empty.
    pub fn start(&mut self) -> io::Result<()> {
        if self.log.is_empty() {
            writeln!(self.out, "{PLACEHOLDER}")?;
        }
        self.render_new()
    }

    pub fn push(&mut self, event: &InboundEvent) -> io::Result<()> {
        self.log.push(event);
        self.render_new()
    }

    pub fn status(&mut self, line: impl AsRef<str>) -> io::Result<()> {
        writeln!(self.out, "* {}", line.as_ref())?;
        self.out.flush()
    }

    fn render_new(&mut self) -> io::Result<()> {
        for entry in self.log.since(self.rendered) {
            writeln!(self.out, "{entry}")?;
        }
        self.rendered = self.log.len();
        self.out.flush()
    }

    #[cfg(test)]
    pub fn output(&self) -> &W {
        &self.out
    }
}
