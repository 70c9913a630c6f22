//! Displayed message history.
//!
//! The session pushes nothing here itself; the UI feeds inbound events in and
//! renders from the log, so it only ever holds this read-only view.

use roomchat_shared::InboundEvent;

/// Texts shown in the chat window, in arrival order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MessageLog {
    entries: Vec<String>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the text of an inbound message. Returns its index.
    pub fn push(&mut self, event: &InboundEvent) -> usize {
        self.entries.push(event.payload.text().to_string());
        self.entries.len() - 1
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Entries from `index` on, for incremental rendering.
    pub fn since(&self, index: usize) -> &[String] {
        self.entries.get(index..).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
