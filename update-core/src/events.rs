//! Lifecycle events delivered synchronously while an update runs.

use crate::error::UpdateError;
use serde::{Deserialize, Serialize};
use std::sync::mpsc::Sender;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateEvent {
    /// Capacity check passed, the image is about to be written.
    Start,
    Progress { written: u64, total: u64 },
    /// Image committed.
    End,
    Error(UpdateError),
}

impl UpdateEvent {
    /// Progress in whole percent, `None` for non-progress events.
    pub fn percent(&self) -> Option<u8> {
        match *self {
            UpdateEvent::Progress { written, total } if total > 0 => {
                Some(((written.min(total) * 100) / total) as u8)
            }
            UpdateEvent::Progress { .. } => Some(0),
            _ => None,
        }
    }
}

/// Receives lifecycle events inline with the update state machine.
/// Implementations must not block for long.
pub trait UpdateListener {
    fn on_event(&mut self, event: &UpdateEvent);
}

impl UpdateListener for () {
    fn on_event(&mut self, _event: &UpdateEvent) {}
}

/// Adapts a closure into a listener.
pub struct FnListener<F>(pub F);

impl<F: FnMut(&UpdateEvent)> UpdateListener for FnListener<F> {
    fn on_event(&mut self, event: &UpdateEvent) {
        (self.0)(event)
    }
}

pub fn from_fn<F: FnMut(&UpdateEvent)>(f: F) -> FnListener<F> {
    FnListener(f)
}

impl UpdateListener for Vec<UpdateEvent> {
    fn on_event(&mut self, event: &UpdateEvent) {
        self.push(event.clone());
    }
}

impl UpdateListener for Sender<UpdateEvent> {
    fn on_event(&mut self, event: &UpdateEvent) {
        // Receiver gone means nobody is listening anymore.
        let _ = self.send(event.clone());
    }
}
