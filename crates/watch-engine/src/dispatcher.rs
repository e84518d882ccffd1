//! Dispatcher capability and change events.
//!
//! A dispatcher is shared by every loop, so implementations must tolerate
//! concurrent calls. Calls are made inline from the loop: a slow handler
//! delays its own kind and nothing else.

use crate::error::HandlerError;
use crate::object::ObjectSnapshot;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Notification backend invoked once per detected transition.
#[async_trait::async_trait]
pub trait Dispatcher: Send + Sync {
    /// An object appeared (or was seen for the first time).
    async fn on_added(&self, obj: &ObjectSnapshot) -> Result<(), HandlerError>;

    /// An object changed.
    async fn on_updated(&self, old: &ObjectSnapshot, new: &ObjectSnapshot) -> Result<(), HandlerError>;

    /// An object was removed.
    async fn on_deleted(&self, obj: &ObjectSnapshot) -> Result<(), HandlerError>;
}

/// Kind of transition an event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Object created
    Added,
    /// Object changed
    Updated,
    /// Object removed
    Deleted,
}

impl Action {
    /// Lower-case name used in logs, metrics and payloads.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Added => "added",
            Action::Updated => "updated",
            Action::Deleted => "deleted",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized lifecycle transition.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// Object created
    Added(ObjectSnapshot),
    /// Object changed from `old` to `new`
    Updated {
        /// State before the change
        old: ObjectSnapshot,
        /// State after the change
        new: ObjectSnapshot,
    },
    /// Object removed
    Deleted(ObjectSnapshot),
}

impl ChangeEvent {
    /// Transition type.
    #[must_use]
    pub fn action(&self) -> Action {
        match self {
            ChangeEvent::Added(_) => Action::Added,
            ChangeEvent::Updated { .. } => Action::Updated,
            ChangeEvent::Deleted(_) => Action::Deleted,
        }
    }

    /// The object as it is after the transition (final state for deletes).
    #[must_use]
    pub fn object(&self) -> &ObjectSnapshot {
        match self {
            ChangeEvent::Added(obj) | ChangeEvent::Deleted(obj) => obj,
            ChangeEvent::Updated { new, .. } => new,
        }
    }

    /// Invoke the matching dispatcher method once.
    ///
    /// A panicking handler is reported as [`HandlerError::Panicked`].
    pub async fn deliver(&self, dispatcher: &dyn Dispatcher) -> Result<(), HandlerError> {
        let call = async {
            match self {
                ChangeEvent::Added(obj) => dispatcher.on_added(obj).await,
                ChangeEvent::Updated { old, new } => dispatcher.on_updated(old, new).await,
                ChangeEvent::Deleted(obj) => dispatcher.on_deleted(obj).await,
            }
        };
        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
        }
    }

    /// Deliver with up to `attempts` tries, sleeping `retry_delay` in between.
    ///
    /// Returns the last error when every attempt failed. The caller decides
    /// what to do with the dropped event. Both the handler call and the
    /// retry pause give way to `cancel`, yielding [`HandlerError::Cancelled`].
    pub async fn deliver_with_retry(
        &self,
        dispatcher: &dyn Dispatcher,
        attempts: u32,
        retry_delay: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(HandlerError::Cancelled),
                result = self.deliver(dispatcher) => result,
            };
            match result {
                Ok(()) => return Ok(()),
                Err(HandlerError::Cancelled) => {
                    debug!(
                        kind = %self.object().kind,
                        key = %self.object().key,
                        action = %self.action(),
                        "Abandoning change event on shutdown"
                    );
                    return Err(HandlerError::Cancelled);
                }
                Err(e) if attempt >= attempts => {
                    error!(
                        kind = %self.object().kind,
                        key = %self.object().key,
                        action = %self.action(),
                        attempts,
                        "Dropping change event after handler failures: {}",
                        e
                    );
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        kind = %self.object().kind,
                        key = %self.object().key,
                        action = %self.action(),
                        attempt,
                        "Handler failed, retrying: {}",
                        e
                    );
                    attempt += 1;
                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => return Err(HandlerError::Cancelled),
                        () = tokio::time::sleep(retry_delay) => {}
                    }
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kind::ResourceKind;
    use crate::mock::RecordingDispatcher;
    use crate::object::{ObjectKey, ResourceVersion};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn snapshot(name: &str) -> ObjectSnapshot {
        ObjectSnapshot {
            kind: ResourceKind::Service,
            key: ObjectKey::namespaced("default", name),
            resource_version: ResourceVersion::from("1"),
            object: serde_json::json!({ "metadata": { "name": name } }),
        }
    }

    struct FlakyDispatcher {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Dispatcher for FlakyDispatcher {
        async fn on_added(&self, _obj: &ObjectSnapshot) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(HandlerError::Delivery("connection refused".to_string()));
            }
            Ok(())
        }

        async fn on_updated(&self, _old: &ObjectSnapshot, _new: &ObjectSnapshot) -> Result<(), HandlerError> {
            Ok(())
        }

        async fn on_deleted(&self, _obj: &ObjectSnapshot) -> Result<(), HandlerError> {
            panic!("backend exploded");
        }
    }

    #[tokio::test]
    async fn test_deliver_routes_by_action() {
        let dispatcher = RecordingDispatcher::new();
        ChangeEvent::Added(snapshot("a")).deliver(&dispatcher).await.unwrap();
        ChangeEvent::Updated { old: snapshot("a"), new: snapshot("a") }
            .deliver(&dispatcher)
            .await
            .unwrap();
        ChangeEvent::Deleted(snapshot("a")).deliver(&dispatcher).await.unwrap();

        let actions: Vec<Action> = dispatcher.events().iter().map(|e| e.action).collect();
        assert_eq!(actions, vec![Action::Added, Action::Updated, Action::Deleted]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_transient_failures() {
        let dispatcher = FlakyDispatcher { failures_left: AtomicU32::new(2), calls: AtomicU32::new(0) };
        let result = ChangeEvent::Added(snapshot("a"))
            .deliver_with_retry(&dispatcher, 3, Duration::from_millis(100), &CancellationToken::new())
            .await;
        assert!(result.is_ok());
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_attempts() {
        let dispatcher = FlakyDispatcher { failures_left: AtomicU32::new(10), calls: AtomicU32::new(0) };
        let result = ChangeEvent::Added(snapshot("a"))
            .deliver_with_retry(&dispatcher, 3, Duration::from_millis(100), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(HandlerError::Delivery(_))));
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_panic_becomes_handler_error() {
        let dispatcher = FlakyDispatcher { failures_left: AtomicU32::new(0), calls: AtomicU32::new(0) };
        let result = ChangeEvent::Deleted(snapshot("a")).deliver(&dispatcher).await;
        match result {
            Err(HandlerError::Panicked(msg)) => assert!(msg.contains("backend exploded")),
            other => panic!("expected panic error, got {other:?}"),
        }
    }

    struct HangingDispatcher;

    #[async_trait::async_trait]
    impl Dispatcher for HangingDispatcher {
        async fn on_added(&self, _obj: &ObjectSnapshot) -> Result<(), HandlerError> {
            std::future::pending().await
        }

        async fn on_updated(&self, _old: &ObjectSnapshot, _new: &ObjectSnapshot) -> Result<(), HandlerError> {
            std::future::pending().await
        }

        async fn on_deleted(&self, _obj: &ObjectSnapshot) -> Result<(), HandlerError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_hung_handler() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(
            Duration::from_secs(60),
            ChangeEvent::Added(snapshot("a")).deliver_with_retry(&HangingDispatcher, 3, Duration::from_millis(100), &cancel),
        )
        .await
        .expect("delivery should give way to cancellation");
        assert_eq!(result, Err(HandlerError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_retry_pause() {
        let dispatcher = FlakyDispatcher { failures_left: AtomicU32::new(10), calls: AtomicU32::new(0) };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let started = tokio::time::Instant::now();
        let result = ChangeEvent::Added(snapshot("a"))
            .deliver_with_retry(&dispatcher, 3, Duration::from_secs(3600), &cancel)
            .await;
        assert_eq!(result, Err(HandlerError::Cancelled));
        assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
