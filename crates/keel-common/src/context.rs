//! Per-run execution context
//!
//! A [`Context`] is passed explicitly down every call chain. It carries the
//! cancellation token for the run and, optionally, the sender half of a
//! status channel. There is no global status bus: whoever holds a context
//! can report progress, and a context without a channel drops events.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::status::StatusEvent;

/// Shared slot holding the status sender.
///
/// Every context derived from the same `with_channel` call shares one slot,
/// so closing it stops delivery for all of them at once.
#[derive(Debug, Clone, Default)]
pub(crate) struct StatusSink {
    inner: Arc<Mutex<Option<mpsc::Sender<StatusEvent>>>>,
}

impl StatusSink {
    fn new(tx: mpsc::Sender<StatusEvent>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(tx))),
        }
    }

    fn try_send(&self, event: StatusEvent) {
        let guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let Some(tx) = guard.as_ref() else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                trace!(message = %event.message(), "status channel full, dropping event");
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Drop the sender so the receiver sees end-of-stream once drained.
    pub(crate) fn close(&self) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.take();
    }
}

/// Execution context for one bootstrap run
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: CancellationToken,
    status: Option<StatusSink>,
}

impl Context {
    /// Create a root context with a fresh cancellation token and no channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a root context driven by an existing cancellation token
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            status: None,
        }
    }

    /// Derive a context whose status events go to `tx`.
    ///
    /// Replaces any channel attached to `self` for sends made through the
    /// returned context; `self` keeps its previous target.
    pub fn with_channel(&self, tx: mpsc::Sender<StatusEvent>) -> Self {
        Self {
            cancel: self.cancel.clone(),
            status: Some(StatusSink::new(tx)),
        }
    }

    /// Send a status event without blocking.
    ///
    /// Without a channel the event is dropped. When the channel is full the
    /// event is dropped too: progress reporting never stalls the caller.
    pub fn send(&self, event: StatusEvent) {
        if let Some(sink) = &self.status {
            sink.try_send(event);
        }
    }

    /// Whether a status channel is attached
    pub fn has_channel(&self) -> bool {
        self.status.is_some()
    }

    /// Cancel this context and every context derived from it
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the context has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The underlying cancellation token
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Return `Err(Cancelled)` if the context has been cancelled
    pub fn check_cancelled(&self, what: &str) -> crate::Result<()> {
        if self.is_cancelled() {
            return Err(crate::Error::cancelled(what));
        }
        Ok(())
    }

    pub(crate) fn status_sink(&self) -> Option<StatusSink> {
        self.status.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Story: a buffer of size N accepts N events, silently drops the next one
    /// and never blocks the sender
    #[test]
    fn story_full_channel_drops_without_blocking() {
        let (tx, mut rx) = mpsc::channel(3);
        let ctx = Context::new().with_channel(tx);

        for i in 0..4 {
            ctx.send(StatusEvent::info(format!("event {i}")));
        }

        for i in 0..3 {
            let event = rx.try_recv().expect("first N events are readable");
            assert_eq!(event.message(), format!("event {i}"));
        }
        assert!(rx.try_recv().is_err(), "the (N+1)th event was dropped");
    }

    #[test]
    fn send_without_channel_is_silently_dropped() {
        let ctx = Context::new();
        assert!(!ctx.has_channel());
        ctx.send(StatusEvent::error("nobody is listening"));
    }

    #[test]
    fn attaching_again_replaces_target_for_derived_context() {
        let (first_tx, mut first_rx) = mpsc::channel(4);
        let (second_tx, mut second_rx) = mpsc::channel(4);

        let first = Context::new().with_channel(first_tx);
        let second = first.with_channel(second_tx);

        second.send(StatusEvent::info("to second"));
        first.send(StatusEvent::info("to first"));

        assert_eq!(second_rx.try_recv().unwrap().message(), "to second");
        assert_eq!(first_rx.try_recv().unwrap().message(), "to first");
        assert!(first_rx.try_recv().is_err());
    }

    #[test]
    fn closed_sink_stops_delivery_for_all_clones() {
        let (tx, mut rx) = mpsc::channel(4);
        let ctx = Context::new().with_channel(tx);
        let clone = ctx.clone();

        ctx.status_sink().unwrap().close();
        clone.send(StatusEvent::info("after close"));

        assert!(rx.try_recv().is_err());
    }
}
