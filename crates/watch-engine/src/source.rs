//! Watch Source: "list everything" plus "stream changes from a version" for
//! one resource kind.
//!
//! [`KubeWatchSource`] is the production adapter over `kube::Api`. Tests use
//! [`crate::MockWatchSource`].

use crate::error::WatchError;
use crate::object::{ResourceVersion, WatchedObject};
use futures::StreamExt;
use futures::stream::BoxStream;
use kube::Api;
use kube::api::{ListParams, WatchEvent, WatchParams};
use tracing::debug;

/// Server-side watch timeout. The API server caps this below 295 seconds.
const WATCH_TIMEOUT_SECS: u32 = 290;

/// Result of a full list.
#[derive(Debug, Clone)]
pub struct Listing<K> {
    /// Every object that currently exists.
    pub objects: Vec<K>,
    /// Version the list was taken at; the watch resumes from here.
    pub resource_version: ResourceVersion,
}

/// A decoded change record from the watch stream.
#[derive(Debug, Clone)]
pub enum WatchRecord<K> {
    /// Object was created.
    Added(K),
    /// Object was changed.
    Modified(K),
    /// Object was removed; carries its final state.
    Deleted(K),
    /// Progress marker carrying only a newer resource version.
    Bookmark(ResourceVersion),
}

/// Stream of change records. End of stream means "reconnect", not "stop".
pub type WatchStream<K> = BoxStream<'static, Result<WatchRecord<K>, WatchError>>;

/// List + watch access to one resource kind.
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait WatchSource<K>: Send + Sync {
    /// List every object of the kind across all namespaces.
    async fn list_all(&self) -> Result<Listing<K>, WatchError>;

    /// Open a watch starting after `from`.
    ///
    /// Fails with [`WatchError::WatchExpired`] when `from` has been compacted.
    async fn open_watch(&self, from: &ResourceVersion) -> Result<WatchStream<K>, WatchError>;
}

/// Watch source backed by the Kubernetes API, scoped to all namespaces with
/// no field selector.
#[derive(Clone)]
pub struct KubeWatchSource<K> {
    api: Api<K>,
}

impl<K> std::fmt::Debug for KubeWatchSource<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeWatchSource").finish_non_exhaustive()
    }
}

impl<K: WatchedObject> KubeWatchSource<K> {
    /// Watch every object of `K` the client can see.
    #[must_use]
    pub fn all(client: kube::Client) -> Self {
        Self { api: Api::all(client) }
    }

    /// Wrap an existing API handle.
    #[must_use]
    pub fn from_api(api: Api<K>) -> Self {
        Self { api }
    }
}

#[async_trait::async_trait]
impl<K: WatchedObject> WatchSource<K> for KubeWatchSource<K> {
    async fn list_all(&self) -> Result<Listing<K>, WatchError> {
        let list = self
            .api
            .list(&ListParams::default())
            .await
            .map_err(|e| WatchError::from_kube(&e))?;
        let resource_version = ResourceVersion::new(list.metadata.resource_version.unwrap_or_default());
        debug!(count = list.items.len(), %resource_version, "listed objects");
        Ok(Listing {
            objects: list.items,
            resource_version,
        })
    }

    async fn open_watch(&self, from: &ResourceVersion) -> Result<WatchStream<K>, WatchError> {
        let params = WatchParams::default().timeout(WATCH_TIMEOUT_SECS);
        let stream = self
            .api
            .watch(&params, from.as_str())
            .await
            .map_err(|e| WatchError::from_kube(&e))?;
        Ok(stream.map(decode_event).boxed())
    }
}

fn decode_event<K>(event: Result<WatchEvent<K>, kube::Error>) -> Result<WatchRecord<K>, WatchError> {
    match event {
        Ok(WatchEvent::Added(obj)) => Ok(WatchRecord::Added(obj)),
        Ok(WatchEvent::Modified(obj)) => Ok(WatchRecord::Modified(obj)),
        Ok(WatchEvent::Deleted(obj)) => Ok(WatchRecord::Deleted(obj)),
        Ok(WatchEvent::Bookmark(bm)) => Ok(WatchRecord::Bookmark(ResourceVersion::new(bm.metadata.resource_version))),
        Ok(WatchEvent::Error(status)) => Err(WatchError::from_status_code(status.code, &status.message)),
        Err(e) => Err(WatchError::from_kube(&e)),
    }
}
