//! Event recording
//!
//! Events are broadcast to subscribers and kept in a bounded history so that
//! parked claims stay visible to operators after the fact.

use hostpath_types::{ControllerEvent, ControllerEventEnvelope, EventSeverity};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

const DEFAULT_HISTORY: usize = 256;

/// Broadcasts controller events on behalf of one instance
#[derive(Debug, Clone)]
pub struct EventRecorder {
    actor: String,
    tx: broadcast::Sender<ControllerEventEnvelope>,
    history: Arc<Mutex<VecDeque<ControllerEventEnvelope>>>,
    capacity: usize,
}

impl EventRecorder {
    pub fn new(actor: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_HISTORY);
        Self {
            actor: actor.into(),
            tx,
            history: Arc::new(Mutex::new(VecDeque::with_capacity(DEFAULT_HISTORY))),
            capacity: DEFAULT_HISTORY,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEventEnvelope> {
        self.tx.subscribe()
    }

    /// Record an event
    pub fn record(&self, event: ControllerEvent) {
        let envelope = ControllerEventEnvelope::new(event, self.actor.clone());
        match envelope.severity {
            EventSeverity::Error => tracing::error!(
                reason = envelope.event.reason_code(),
                event = ?envelope.event,
                "Controller event"
            ),
            EventSeverity::Warning => tracing::warn!(
                reason = envelope.event.reason_code(),
                event = ?envelope.event,
                "Controller event"
            ),
            _ => tracing::debug!(
                reason = envelope.event.reason_code(),
                event = ?envelope.event,
                "Controller event"
            ),
        }

        {
            let mut history = self
                .history
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(envelope.clone());
        }

        let _ = self.tx.send(envelope);
    }

    /// Most recent events, oldest first
    pub fn recent(&self) -> Vec<ControllerEventEnvelope> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}
