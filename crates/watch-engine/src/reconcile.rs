//! Reconciliation Loop
//!
//! One loop per resource kind. The loop is a small state machine:
//!
//! ```text
//! Starting -> Listing -> Streaming -> (Listing | Resyncing) -> Streaming -> ... -> Stopped
//! ```
//!
//! - Listing seeds (or re-seeds) the mirror from a full list and diffs it
//!   against what was mirrored before, emitting Added/Updated/Deleted for drift.
//! - Streaming applies watch records one at a time. Duplicate and stale
//!   records (version not strictly newer) are suppressed.
//! - Stream end, watch expiry, or stream errors go back to Listing.
//! - A resync timer independent of stream activity forces Resyncing.
//! - Rejected credentials on list or watch stop the loop with an error.
//!
//! Listing, streaming, resync and dispatch all run sequentially on the loop's
//! own task, so the mirror never sees concurrent writers. Cancellation is
//! honoured inside handler calls and retry pauses too.

use crate::backoff::ExponentialBackoff;
use crate::dispatcher::{ChangeEvent, Dispatcher};
use crate::error::{EngineError, HandlerError, WatchError};
use crate::kind::ResourceKind;
use crate::metrics::EngineMetrics;
use crate::mirror::{Mirror, MirrorReader};
use crate::object::{ObjectKey, ObjectSnapshot, ResourceVersion, WatchedObject};
use crate::source::{Listing, WatchRecord, WatchSource};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Tuning for a reconciliation loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopConfig {
    /// Forced full re-list interval.
    pub resync_period: Duration,
    /// First retry delay after a list/watch failure.
    pub backoff_initial: Duration,
    /// Retry delay ceiling.
    pub backoff_max: Duration,
    /// Report updates for every kind, not only the kinds that report them by default.
    pub notify_all_updates: bool,
    /// Delivery attempts per change event before it is dropped.
    pub dispatch_attempts: u32,
    /// Pause between delivery attempts.
    pub dispatch_retry_delay: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            resync_period: Duration::from_secs(30 * 60),
            backoff_initial: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
            notify_all_updates: false,
            dispatch_attempts: 3,
            dispatch_retry_delay: Duration::from_millis(500),
        }
    }
}

/// Where a loop currently is in its state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Created, nothing listed yet
    Starting,
    /// Running a full list (initial or after the stream was lost)
    Listing,
    /// Consuming the watch stream
    Streaming,
    /// Running a timer-forced full list
    Resyncing,
    /// Cancelled or failed
    Stopped,
}

/// Observable loop status, published on a `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopStatus {
    /// Current state
    pub state: LoopState,
    /// Whether at least one full list has been applied
    pub synced: bool,
    /// Latest watermark seen
    pub resource_version: ResourceVersion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListReason {
    Initial,
    StreamEnded,
    WatchExpired,
    WatchError,
    Periodic,
}

impl ListReason {
    fn as_str(self) -> &'static str {
        match self {
            ListReason::Initial => "initial",
            ListReason::StreamEnded => "stream_ended",
            ListReason::WatchExpired => "watch_expired",
            ListReason::WatchError => "watch_error",
            ListReason::Periodic => "periodic",
        }
    }

    fn state(self) -> LoopState {
        match self {
            ListReason::Periodic => LoopState::Resyncing,
            _ => LoopState::Listing,
        }
    }
}

/// List/watch/resync loop for one resource kind.
pub struct ReconcileLoop<K, S> {
    kind: ResourceKind,
    source: S,
    mirror: Mirror<K>,
    dispatcher: Arc<dyn Dispatcher>,
    metrics: EngineMetrics,
    config: LoopConfig,
    notify_updates: bool,
    status: watch::Sender<LoopStatus>,
    cancel: CancellationToken,
}

impl<K, S> std::fmt::Debug for ReconcileLoop<K, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileLoop")
            .field("kind", &self.kind)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<K, S> ReconcileLoop<K, S>
where
    K: WatchedObject,
    S: WatchSource<K>,
{
    /// Create a loop with an empty mirror.
    pub fn new(
        kind: ResourceKind,
        source: S,
        dispatcher: Arc<dyn Dispatcher>,
        metrics: EngineMetrics,
        config: LoopConfig,
    ) -> Self {
        let notify_updates = config.notify_all_updates || kind.notifies_updates();
        let (status, _) = watch::channel(LoopStatus {
            state: LoopState::Starting,
            synced: false,
            resource_version: ResourceVersion::default(),
        });
        Self {
            kind,
            source,
            mirror: Mirror::new(),
            dispatcher,
            metrics,
            config,
            notify_updates,
            status,
            cancel: CancellationToken::new(),
        }
    }

    /// Kind this loop watches.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Read-only handle on the mirror.
    #[must_use]
    pub fn mirror(&self) -> MirrorReader<K> {
        self.mirror.reader()
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<LoopStatus> {
        self.status.subscribe()
    }

    /// Run until `cancel` fires.
    ///
    /// List and watch failures are retried with backoff and never end the
    /// loop. Only rejected credentials do, whether the list or the watch
    /// rejects them.
    ///
    /// The backoff grows across consecutive failed list/watch cycles and
    /// resets once a watch stream delivers something. A successful list alone
    /// does not reset it.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), EngineError> {
        self.cancel = cancel;
        info!(kind = %self.kind, "Starting reconciliation loop");

        let mut backoff = ExponentialBackoff::new(self.config.backoff_initial, self.config.backoff_max);
        let period = self.config.resync_period;
        let mut resync = tokio::time::interval_at(Instant::now() + period, period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut reason = ListReason::Initial;
        let result = loop {
            // A source that fails instantly must not monopolize the worker.
            tokio::task::yield_now().await;
            self.set_state(reason.state());
            let listing = match self.list(&mut backoff).await {
                Ok(Some(listing)) => listing,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            self.metrics.resync(self.kind, reason.as_str());
            let watermark = listing.resource_version.clone();
            debug!(
                kind = %self.kind,
                reason = reason.as_str(),
                count = listing.objects.len(),
                resource_version = %watermark,
                "Applying full list"
            );
            self.apply_listing(listing.objects).await;
            if self.cancel.is_cancelled() {
                break Ok(());
            }
            self.status.send_modify(|s| {
                s.synced = true;
                s.resource_version = watermark.clone();
            });

            reason = match self.stream(&mut resync, watermark, &mut backoff).await {
                Ok(Some(next)) => next,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
        };

        self.set_state(LoopState::Stopped);
        match &result {
            Ok(()) => info!(kind = %self.kind, "Reconciliation loop stopped"),
            Err(e) => error!(kind = %self.kind, "Reconciliation loop failed: {}", e),
        }
        result
    }

    /// Apply one watch record to the mirror and dispatch the resulting event,
    /// if any.
    pub async fn apply_record(&self, record: WatchRecord<K>) {
        match record {
            WatchRecord::Added(obj) | WatchRecord::Modified(obj) => self.upsert(obj, true).await,
            WatchRecord::Deleted(obj) => self.remove(obj).await,
            WatchRecord::Bookmark(_) => {}
        }
        self.metrics.mirror_size(self.kind, self.mirror.len());
    }

    /// Diff a full list against the mirror.
    ///
    /// Objects new to the mirror are Added, objects whose version differs are
    /// Updated, and mirrored objects missing from the list are Deleted.
    /// Stops early once the loop is cancelled.
    pub async fn apply_listing(&self, objects: Vec<K>) {
        let mut seen = HashSet::with_capacity(objects.len());
        for obj in objects {
            if self.cancel.is_cancelled() {
                return;
            }
            seen.insert(ObjectKey::from_resource(&obj));
            self.upsert(obj, false).await;
        }

        for key in self.mirror.keys() {
            if self.cancel.is_cancelled() {
                return;
            }
            if seen.contains(&key) {
                continue;
            }
            if let Some(old) = self.mirror.delete(&key) {
                debug!(kind = %self.kind, %key, "Object missing from list, reporting delete");
                self.emit(ChangeEvent::Deleted(self.snapshot(&old))).await;
            }
        }
        self.metrics.mirror_size(self.kind, self.mirror.len());
    }

    async fn list(&self, backoff: &mut ExponentialBackoff) -> Result<Option<Listing<K>>, EngineError> {
        loop {
            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(None),
                result = self.source.list_all() => result,
            };
            match result {
                Ok(listing) => return Ok(Some(listing)),
                Err(WatchError::Unauthorized(message)) => return Err(self.unauthorized(message)),
                Err(e) => {
                    self.metrics.api_error(self.kind, e.label());
                    let delay = backoff.next_backoff();
                    warn!(kind = %self.kind, ?delay, "List failed, retrying: {}", e);
                    if !sleep_or_cancel(&self.cancel, delay).await {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Consume the watch stream. Returns why the next list is needed, or
    /// `None` when cancelled.
    async fn stream(
        &self,
        resync: &mut Interval,
        mut watermark: ResourceVersion,
        backoff: &mut ExponentialBackoff,
    ) -> Result<Option<ListReason>, EngineError> {
        self.set_state(LoopState::Streaming);

        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Ok(None),
            opened = self.source.open_watch(&watermark) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(WatchError::WatchExpired(msg)) => {
                debug!(kind = %self.kind, resource_version = %watermark, "Watch expired on open: {}", msg);
                return Ok(Some(ListReason::WatchExpired));
            }
            Err(WatchError::Unauthorized(message)) => return Err(self.unauthorized(message)),
            Err(e) => {
                self.metrics.api_error(self.kind, e.label());
                let delay = backoff.next_backoff();
                warn!(kind = %self.kind, ?delay, "Opening watch failed, relisting: {}", e);
                let slept = sleep_or_cancel(&self.cancel, delay).await;
                return Ok(slept.then_some(ListReason::WatchError));
            }
        };

        let mut received = 0usize;
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Ok(None),
                _ = resync.tick() => {
                    info!(kind = %self.kind, "Periodic resync");
                    return Ok(Some(ListReason::Periodic));
                }
                next = stream.next() => {
                    match next {
                        None => {
                            debug!(kind = %self.kind, received, "Watch stream ended");
                            if received == 0 && !self.pause(backoff).await {
                                return Ok(None);
                            }
                            return Ok(Some(ListReason::StreamEnded));
                        }
                        Some(Ok(record)) => {
                            if received == 0 {
                                backoff.reset();
                            }
                            received += 1;
                            match record {
                                WatchRecord::Bookmark(version) => {
                                    watermark = version;
                                    self.status.send_modify(|s| s.resource_version = watermark.clone());
                                }
                                record => self.apply_record(record).await,
                            }
                        }
                        Some(Err(WatchError::WatchExpired(msg))) => {
                            debug!(kind = %self.kind, resource_version = %watermark, "Watch expired: {}", msg);
                            return Ok(Some(ListReason::WatchExpired));
                        }
                        Some(Err(WatchError::Unauthorized(message))) => return Err(self.unauthorized(message)),
                        Some(Err(e)) => {
                            self.metrics.api_error(self.kind, e.label());
                            warn!(kind = %self.kind, received, "Watch stream error, relisting: {}", e);
                            if received == 0 && !self.pause(backoff).await {
                                return Ok(None);
                            }
                            return Ok(Some(ListReason::WatchError));
                        }
                    }
                }
            }
        }
    }

    /// Sleep the next backoff delay; `false` if cancelled first.
    async fn pause(&self, backoff: &mut ExponentialBackoff) -> bool {
        let delay = backoff.next_backoff();
        debug!(kind = %self.kind, ?delay, "Backing off before relist");
        sleep_or_cancel(&self.cancel, delay).await
    }

    fn unauthorized(&self, message: String) -> EngineError {
        self.metrics.api_error(self.kind, "unauthorized");
        EngineError::Unauthorized {
            kind: self.kind,
            message,
        }
    }

    /// Insert or replace `obj`. With `require_newer`, records whose version
    /// is not strictly newer than the mirrored one are dropped; otherwise any
    /// version difference counts as a change.
    async fn upsert(&self, obj: K, require_newer: bool) {
        let key = ObjectKey::from_resource(&obj);
        let version = ResourceVersion::of(&obj);
        let new = Arc::new(obj);

        match self.mirror.get_with_version(&key) {
            None => {
                self.mirror.put(key, Arc::clone(&new), version);
                self.emit(ChangeEvent::Added(self.snapshot(&new))).await;
            }
            Some((old, old_version)) => {
                let changed = if require_newer {
                    version.is_newer_than(&old_version)
                } else {
                    version != old_version
                };
                if !changed {
                    debug!(
                        kind = %self.kind,
                        %key,
                        resource_version = %version,
                        mirrored = %old_version,
                        "Suppressing duplicate or stale record"
                    );
                    return;
                }
                self.mirror.put(key, Arc::clone(&new), version);
                if self.notify_updates {
                    self.emit(ChangeEvent::Updated {
                        old: self.snapshot(&old),
                        new: self.snapshot(&new),
                    })
                    .await;
                }
            }
        }
    }

    async fn remove(&self, obj: K) {
        let key = ObjectKey::from_resource(&obj);
        if self.mirror.delete(&key).is_some() {
            self.emit(ChangeEvent::Deleted(self.snapshot(&obj))).await;
        } else {
            debug!(kind = %self.kind, %key, "Ignoring delete for unknown object");
        }
    }

    async fn emit(&self, event: ChangeEvent) {
        let action = event.action();
        let delivered = event
            .deliver_with_retry(
                self.dispatcher.as_ref(),
                self.config.dispatch_attempts,
                self.config.dispatch_retry_delay,
                &self.cancel,
            )
            .await;
        match delivered {
            Ok(()) => self.metrics.event_dispatched(self.kind, action.as_str()),
            Err(HandlerError::Cancelled) => {}
            Err(_) => self.metrics.handler_failure(self.kind),
        }
    }

    fn snapshot(&self, obj: &K) -> ObjectSnapshot {
        ObjectSnapshot::from_resource(self.kind, obj)
    }

    fn set_state(&self, state: LoopState) {
        self.status.send_modify(|s| s.state = state);
    }
}

/// Sleep for `delay`; returns `false` if cancelled first.
async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}
