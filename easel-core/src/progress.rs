//! Progress events and the in-process channel that fans them out.
//!
//! A [`ProgressChannel`] belongs to exactly one generation. The producer
//! calls [`ProgressChannel::emit`] (synchronously, from any thread,
//! including the blocking thread the engine runs on); observers call
//! [`ProgressChannel::subscribe`] and consume a finite [`ProgressStream`]
//! that ends right after the terminal `Completed`/`Failed` event.

use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::ArtifactId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Fraction of sampling steps completed, in `(0, 1]`.
    Progress { fraction: f64 },
    Completed { artifact_id: ArtifactId },
    Failed { reason: String },
}

impl ProgressEvent {
    /// `Progress` event for `completed` out of `total` steps.
    ///
    /// Returns `None` when no step has completed yet or `total` is zero.
    pub fn step(completed: usize, total: usize) -> Option<Self> {
        if completed == 0 || total == 0 {
            return None;
        }
        let fraction = (completed as f64 / total as f64).min(1.0);
        Some(ProgressEvent::Progress { fraction })
    }

    pub fn failed(reason: impl ToString) -> Self {
        ProgressEvent::Failed {
            reason: reason.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProgressEvent::Progress { .. })
    }
}

#[derive(Debug, Default)]
struct ChannelState {
    subscribers: Vec<mpsc::UnboundedSender<ProgressEvent>>,
    last_fraction: f64,
    finished: bool,
}

/// Single-producer, multi-observer progress channel for one generation.
///
/// Cloning yields another handle to the same channel.
#[derive(Debug, Clone, Default)]
pub struct ProgressChannel {
    state: Arc<Mutex<ChannelState>>,
}

impl ProgressChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers `event` to every current subscriber before returning.
    ///
    /// Events after the terminal one, and progress fractions lower than
    /// one already emitted, are dropped. Returns whether the event was
    /// accepted.
    pub fn emit(&self, event: ProgressEvent) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.finished {
            tracing::debug!(?event, "Dropping progress event after terminal event");
            return false;
        }
        match &event {
            ProgressEvent::Progress { fraction } => {
                if !(*fraction > 0.0 && *fraction <= 1.0) || *fraction < state.last_fraction {
                    tracing::debug!(fraction, last = state.last_fraction, "Dropping out-of-order progress");
                    return false;
                }
                state.last_fraction = *fraction;
            }
            ProgressEvent::Completed { .. } | ProgressEvent::Failed { .. } => {
                state.finished = true;
            }
        }
        state
            .subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        if state.finished {
            // Dropping the senders lets every stream observe the end.
            state.subscribers.clear();
        }
        true
    }

    /// Observes every event emitted from now on.
    ///
    /// Subscribing after the terminal event yields an empty stream.
    pub fn subscribe(&self) -> ProgressStream {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.finished {
            return ProgressStream { receiver: None };
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        state.subscribers.push(sender);
        ProgressStream {
            receiver: Some(receiver),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finished
    }
}

/// Finite stream of one generation's events; ends after the terminal event.
#[derive(Debug)]
pub struct ProgressStream {
    receiver: Option<mpsc::UnboundedReceiver<ProgressEvent>>,
}

impl Stream for ProgressStream {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Poll::Ready(None);
        };
        match receiver.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if event.is_terminal() {
                    self.receiver = None;
                }
                Poll::Ready(Some(event))
            }
            Poll::Ready(None) => {
                self.receiver = None;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
