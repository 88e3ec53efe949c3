//! Status bus: progress events for the presentation layer
//!
//! Producers call [`Context::send`] with a [`StatusEvent`]; exactly one
//! consumer task, started by [`start_handler`], hands events to a handler
//! function (usually [`log_event`]). Sends never block: when the buffer is
//! full the event is lost rather than stalling the bootstrap.
//!
//! ```ignore
//! let (ctx, handler) = start_handler(&Context::new(), HandlerOptions::default(), log_event);
//! ctx.send(StatusEvent::progress("cloning").with_resource("git@github.com:acme/infra.git"));
//! handler.shutdown().await;
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::context::{Context, StatusSink};

/// Default buffer size of the status channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// Default time `shutdown` waits for the consumer to drain
pub const DEFAULT_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Severity of a status event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    /// Informational message
    Info,
    /// A step has started
    Progress,
    /// A step has completed
    Success,
    /// A best-effort step failed; the run continues
    Warning,
    /// A fatal failure
    Error,
}

impl fmt::Display for StatusLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatusLevel::Info => "info",
            StatusLevel::Progress => "progress",
            StatusLevel::Success => "success",
            StatusLevel::Warning => "warning",
            StatusLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// A progress event.
///
/// Built with the `with_*` methods and moved into the channel on send, after
/// which nobody can change it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusEvent {
    level: StatusLevel,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    metadata: BTreeMap<String, serde_json::Value>,
    timestamp: DateTime<Utc>,
}

impl StatusEvent {
    /// Create an event stamped with the current time
    pub fn new(level: StatusLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            resource: None,
            action: None,
            metadata: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Info-level event
    pub fn info(message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Info, message)
    }

    /// Progress-level event
    pub fn progress(message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Progress, message)
    }

    /// Success-level event
    pub fn success(message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Success, message)
    }

    /// Warning-level event
    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Warning, message)
    }

    /// Error-level event
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Error, message)
    }

    /// Tag the event with the resource it concerns
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Tag the event with the action performed
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Severity
    pub fn level(&self) -> StatusLevel {
        self.level
    }

    /// Human-readable message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Resource the event concerns
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// Action performed
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// Metadata entries
    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    /// When the event was created
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Options for [`start_handler`]
#[derive(Debug, Clone, Copy)]
pub struct HandlerOptions {
    /// Channel buffer size
    pub capacity: usize,
    /// Upper bound on how long `shutdown` waits for the consumer
    pub flush_timeout: Duration,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CHANNEL_CAPACITY,
            flush_timeout: DEFAULT_FLUSH_TIMEOUT,
        }
    }
}

/// Handle to the running consumer task.
///
/// `shutdown` consumes the handle, so it can run at most once.
#[must_use = "call shutdown() to flush pending status events"]
pub struct StatusHandler {
    sink: Option<StatusSink>,
    task: JoinHandle<()>,
    flush_timeout: Duration,
}

impl StatusHandler {
    /// Close the channel and wait for the consumer to drain it.
    ///
    /// Returns `false` if the consumer did not finish within the flush
    /// timeout; trailing events may then be lost, but shutdown never hangs.
    pub async fn shutdown(self) -> bool {
        if let Some(sink) = &self.sink {
            sink.close();
        }

        match tokio::time::timeout(self.flush_timeout, self.task).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(error = %e, "status handler task failed");
                false
            }
            Err(_) => {
                warn!(
                    timeout = ?self.flush_timeout,
                    "status handler did not drain in time, dropping remaining events"
                );
                false
            }
        }
    }
}

/// Start the single consumer for a new status channel.
///
/// Returns a context derived from `ctx` that sends into the channel, and the
/// handle used to shut the consumer down.
pub fn start_handler<F>(
    ctx: &Context,
    options: HandlerOptions,
    mut handler: F,
) -> (Context, StatusHandler)
where
    F: FnMut(StatusEvent) + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(options.capacity.max(1));
    let ctx = ctx.with_channel(tx);
    let sink = ctx.status_sink();

    let task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            handler(event);
        }
    });

    (
        ctx,
        StatusHandler {
            sink,
            task,
            flush_timeout: options.flush_timeout,
        },
    )
}

/// Render a status event onto the tracing subscriber
pub fn log_event(event: StatusEvent) {
    let resource = event.resource().unwrap_or_default();
    let action = event.action().unwrap_or_default();
    let metadata = if event.metadata().is_empty() {
        String::new()
    } else {
        serde_json::to_string(event.metadata()).unwrap_or_default()
    };

    match event.level() {
        StatusLevel::Info | StatusLevel::Progress | StatusLevel::Success => info!(
            level = %event.level(),
            resource,
            action,
            metadata,
            "{}",
            event.message()
        ),
        StatusLevel::Warning => warn!(resource, action, metadata, "{}", event.message()),
        StatusLevel::Error => error!(resource, action, metadata, "{}", event.message()),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn builder_attaches_resource_action_and_metadata() {
        let event = StatusEvent::success("applied")
            .with_resource("Application/argocd/root")
            .with_action("create")
            .with_metadata("attempt", 1)
            .with_metadata("namespace", "argocd");

        assert_eq!(event.level(), StatusLevel::Success);
        assert_eq!(event.resource(), Some("Application/argocd/root"));
        assert_eq!(event.action(), Some("create"));
        assert_eq!(event.metadata()["attempt"], serde_json::json!(1));
        assert_eq!(event.metadata()["namespace"], serde_json::json!("argocd"));
    }

    #[test]
    fn event_serializes_with_lowercase_level() {
        let event = StatusEvent::warning("project failed");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["level"], "warning");
        assert!(json.get("resource").is_none());
        assert!(json.get("timestamp").is_some());
    }

    /// Story: events sent before shutdown are all delivered to the handler,
    /// in order, by the single consumer
    #[tokio::test]
    async fn story_shutdown_flushes_pending_events() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let (ctx, handler) =
            start_handler(&Context::new(), HandlerOptions::default(), move |event| {
                sink.lock().unwrap().push(event.message().to_string());
            });

        for i in 0..10 {
            ctx.send(StatusEvent::progress(format!("step {i}")));
        }

        assert!(handler.shutdown().await);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 10);
        assert_eq!(seen[0], "step 0");
        assert_eq!(seen[9], "step 9");

        // After shutdown the context silently drops.
        ctx.send(StatusEvent::info("late"));
    }

    /// Story: a stuck presentation layer cannot hang shutdown
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn story_shutdown_gives_up_after_flush_timeout() {
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        let options = HandlerOptions {
            capacity: 4,
            flush_timeout: Duration::from_millis(100),
        };
        let (ctx, handler) = start_handler(&Context::new(), options, move |_event| {
            // Blocks the consumer until the test releases it.
            let _ = release_rx
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5));
        });

        ctx.send(StatusEvent::info("stuck"));
        ctx.send(StatusEvent::info("queued behind"));

        let started = std::time::Instant::now();
        assert!(!handler.shutdown().await);
        assert!(started.elapsed() < Duration::from_secs(5));
        let _ = release_tx.send(());
    }
}
