//! In-memory doubles for unit testing
//!
//! `MockWatchSource` replays scripted list and watch responses, and
//! `RecordingDispatcher` records every notification it receives. Neither
//! needs a running API server.

use crate::dispatcher::{Action, Dispatcher};
use crate::error::{HandlerError, WatchError};
use crate::kind::ResourceKind;
use crate::object::{ObjectKey, ObjectSnapshot, ResourceVersion};
use crate::source::{Listing, WatchRecord, WatchSource, WatchStream};
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

enum ScriptedWatch<K> {
    Fail(WatchError),
    Records {
        records: Vec<Result<WatchRecord<K>, WatchError>>,
        hold_open: bool,
    },
}

struct MockState<K> {
    lists: VecDeque<Result<Listing<K>, WatchError>>,
    last_listing: Option<Listing<K>>,
    watches: VecDeque<ScriptedWatch<K>>,
    list_calls: usize,
    watch_versions: Vec<ResourceVersion>,
}

/// Scripted watch source.
///
/// List responses are consumed in order; once exhausted the last successful
/// listing is repeated. Watch responses are consumed in order; once exhausted
/// the watch stays open without yielding anything.
pub struct MockWatchSource<K> {
    state: Arc<Mutex<MockState<K>>>,
}

impl<K> Clone for MockWatchSource<K> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<K> std::fmt::Debug for MockWatchSource<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockWatchSource").finish_non_exhaustive()
    }
}

impl<K> Default for MockWatchSource<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> MockWatchSource<K> {
    /// Create a source with nothing scripted.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                lists: VecDeque::new(),
                last_listing: None,
                watches: VecDeque::new(),
                list_calls: 0,
                watch_versions: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a successful list response.
    pub fn push_list(&self, objects: Vec<K>, resource_version: &str) {
        self.lock().lists.push_back(Ok(Listing {
            objects,
            resource_version: ResourceVersion::from(resource_version),
        }));
    }

    /// Queue a failing list response.
    pub fn push_list_error(&self, err: WatchError) {
        self.lock().lists.push_back(Err(err));
    }

    /// Queue a watch that yields `records` and then ends (connection drop).
    pub fn push_watch(&self, records: Vec<WatchRecord<K>>) {
        self.lock().watches.push_back(ScriptedWatch::Records {
            records: records.into_iter().map(Ok).collect(),
            hold_open: false,
        });
    }

    /// Queue a watch that yields `records` and then stays open.
    pub fn push_watch_held_open(&self, records: Vec<WatchRecord<K>>) {
        self.lock().watches.push_back(ScriptedWatch::Records {
            records: records.into_iter().map(Ok).collect(),
            hold_open: true,
        });
    }

    /// Queue a watch that yields `records` followed by an in-stream error.
    pub fn push_watch_then_error(&self, records: Vec<WatchRecord<K>>, err: WatchError) {
        let mut items: Vec<_> = records.into_iter().map(Ok).collect();
        items.push(Err(err));
        self.lock().watches.push_back(ScriptedWatch::Records {
            records: items,
            hold_open: false,
        });
    }

    /// Queue a watch that fails to open.
    pub fn push_watch_error(&self, err: WatchError) {
        self.lock().watches.push_back(ScriptedWatch::Fail(err));
    }

    /// Number of `list_all` calls so far.
    pub fn list_calls(&self) -> usize {
        self.lock().list_calls
    }

    /// Versions each `open_watch` call asked for, in order.
    pub fn watch_versions(&self) -> Vec<ResourceVersion> {
        self.lock().watch_versions.clone()
    }
}

#[async_trait::async_trait]
impl<K> WatchSource<K> for MockWatchSource<K>
where
    K: Clone + Send + Sync + 'static,
{
    async fn list_all(&self) -> Result<Listing<K>, WatchError> {
        let mut state = self.lock();
        state.list_calls += 1;
        match state.lists.pop_front() {
            Some(Ok(listing)) => {
                state.last_listing = Some(listing.clone());
                Ok(listing)
            }
            Some(Err(e)) => Err(e),
            None => state
                .last_listing
                .clone()
                .ok_or_else(|| WatchError::ApiUnavailable("no list scripted".to_string())),
        }
    }

    async fn open_watch(&self, from: &ResourceVersion) -> Result<WatchStream<K>, WatchError> {
        let mut state = self.lock();
        state.watch_versions.push(from.clone());
        match state.watches.pop_front() {
            Some(ScriptedWatch::Fail(e)) => Err(e),
            Some(ScriptedWatch::Records { records, hold_open }) => {
                let replay = futures::stream::iter(records);
                if hold_open {
                    Ok(replay.chain(futures::stream::pending()).boxed())
                } else {
                    Ok(replay.boxed())
                }
            }
            None => Ok(futures::stream::pending().boxed()),
        }
    }
}

/// One notification captured by [`RecordingDispatcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Transition type
    pub action: Action,
    /// Kind of the object
    pub kind: ResourceKind,
    /// Object identity
    pub key: ObjectKey,
    /// Version after the transition
    pub resource_version: ResourceVersion,
    /// Version before the transition (updates only)
    pub old_resource_version: Option<ResourceVersion>,
}

/// Dispatcher that records every call.
#[derive(Debug, Clone, Default)]
pub struct RecordingDispatcher {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingDispatcher {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail (the call is still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Everything recorded so far.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Recorded events for one kind.
    pub fn events_for(&self, kind: ResourceKind) -> Vec<RecordedEvent> {
        self.events().into_iter().filter(|e| e.kind == kind).collect()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` events were recorded for `kind`.
    ///
    /// Returns `false` on timeout.
    pub async fn wait_for(&self, kind: ResourceKind, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.events_for(kind).len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn record(&self, action: Action, obj: &ObjectSnapshot, old: Option<&ObjectSnapshot>) -> Result<(), HandlerError> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedEvent {
                action,
                kind: obj.kind,
                key: obj.key.clone(),
                resource_version: obj.resource_version.clone(),
                old_resource_version: old.map(|o| o.resource_version.clone()),
            });
        if self.failing.load(Ordering::SeqCst) {
            return Err(HandlerError::Rejected("recording dispatcher set to fail".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn on_added(&self, obj: &ObjectSnapshot) -> Result<(), HandlerError> {
        self.record(Action::Added, obj, None)
    }

    async fn on_updated(&self, old: &ObjectSnapshot, new: &ObjectSnapshot) -> Result<(), HandlerError> {
        self.record(Action::Updated, new, Some(old))
    }

    async fn on_deleted(&self, obj: &ObjectSnapshot) -> Result<(), HandlerError> {
        self.record(Action::Deleted, obj, None)
    }
}
