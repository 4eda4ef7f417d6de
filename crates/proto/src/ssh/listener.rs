//! Status notifications for the embedding application.

use std::sync::Mutex;

/// Event code for failures not tied to a parsed message: a broken transport,
/// a bad MAC or an invalid frame. 0 is not an SSH message number.
pub const CONNECTION_FAILED: u8 = 0;

/// Receives one callback per processed inbound message.
///
/// `message_type` is the SSH message number, or [`CONNECTION_FAILED`] when
/// the packet could not be read at all. `message` carries text worth
/// showing to a user: a banner, a disconnect reason, or the error that ended
/// the session. Callbacks run on the task driving the reader and must not
/// block.
pub trait StatusListener: Send + Sync {
    /// Called after the message's handler ran.
    fn on_event(&self, message_type: u8, message: Option<&str>);
}

/// Listener that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl StatusListener for NoopListener {
    fn on_event(&self, _message_type: u8, _message: Option<&str>) {}
}

/// Listener that records every event, useful for tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<(u8, Option<String>)>>,
}

impl RecordingListener {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events seen so far, in order.
    pub fn events(&self) -> Vec<(u8, Option<String>)> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Message types seen so far, in order.
    pub fn message_types(&self) -> Vec<u8> {
        self.events().into_iter().map(|(t, _)| t).collect()
    }
}

impl StatusListener for RecordingListener {
    fn on_event(&self, message_type: u8, message: Option<&str>) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((message_type, message.map(str::to_string)));
    }
}
