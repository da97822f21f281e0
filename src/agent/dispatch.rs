use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, RwLock,
    },
};

use serde_json::Value;
use thiserror::Error;

use super::message::{accept, unwrap_envelope, AgentMessage};

#[derive(Error, Debug)]
#[error("{0}")]
pub struct SubscriberError(pub String);

impl SubscriberError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Receives every accepted agent message
pub trait AgentSubscriber: Send + Sync {
    fn on_message(&self, message: &AgentMessage) -> Result<(), SubscriberError>;
}

impl<F> AgentSubscriber for F
where
    F: Fn(&AgentMessage) -> Result<(), SubscriberError> + Send + Sync,
{
    fn on_message(&self, message: &AgentMessage) -> Result<(), SubscriberError> {
        self(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Validates transport payloads and fans accepted messages out to subscribers.
///
/// A subscriber that errors or panics is logged and skipped, the others
/// still get the message.
#[derive(Default)]
pub struct Dispatcher {
    subscribers: RwLock<Vec<(SubscriptionId, Arc<dyn AgentSubscriber>)>>,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn AgentSubscriber>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, subscriber));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(sub, _)| *sub != id);
    }

    /// Handles a text frame from a transport. Returns how many messages were accepted.
    pub fn accept_frame(&self, frame: &str) -> usize {
        match serde_json::from_str::<Value>(frame) {
            Ok(value) => self.accept_payload(value),
            Err(error) => {
                tracing::debug!(%error, "dropping agent frame that isn't json");
                0
            }
        }
    }

    /// Handles a decoded payload in any of the envelope shapes
    pub fn accept_payload(&self, payload: Value) -> usize {
        let mut accepted = 0;
        for message in unwrap_envelope(payload).into_iter().filter_map(accept) {
            self.dispatch(&message);
            accepted += 1;
        }
        accepted
    }

    /// Delivers a message to every current subscriber, in subscription order
    pub fn dispatch(&self, message: &AgentMessage) {
        let subscribers: Vec<_> = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, s)| s.clone())
            .collect();

        tracing::debug!(
            kind = message.kind(),
            subscribers = subscribers.len(),
            "dispatching agent message"
        );

        for subscriber in subscribers {
            match catch_unwind(AssertUnwindSafe(|| subscriber.on_message(message))) {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!(%error, kind = message.kind(), "agent subscriber failed")
                }
                Err(_) => tracing::error!(kind = message.kind(), "agent subscriber panicked"),
            }
        }
    }
}
