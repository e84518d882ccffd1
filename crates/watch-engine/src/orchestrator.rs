//! Orchestrator: one independent reconciliation task per enabled kind.
//!
//! Kinds share nothing but the dispatcher and the metrics registry, so a
//! stalled or failed loop has no effect on the others.

use crate::dispatcher::Dispatcher;
use crate::error::EngineError;
use crate::kind::ResourceKind;
use crate::metrics::EngineMetrics;
use crate::object::WatchedObject;
use crate::reconcile::{LoopConfig, LoopStatus, ReconcileLoop};
use crate::source::{KubeWatchSource, WatchSource};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolume, Pod, ReplicationController, Service};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A running reconciliation task.
#[derive(Debug)]
pub struct KindTask {
    /// Kind the task watches.
    pub kind: ResourceKind,
    /// Loop status updates.
    pub status: watch::Receiver<LoopStatus>,
    /// Task handle; resolves when the loop stops.
    pub handle: JoinHandle<Result<(), EngineError>>,
}

/// Spawn a reconciliation loop for `kind` over an arbitrary source.
pub fn spawn_loop<K, S>(
    kind: ResourceKind,
    source: S,
    dispatcher: Arc<dyn Dispatcher>,
    metrics: EngineMetrics,
    config: LoopConfig,
    cancel: CancellationToken,
) -> KindTask
where
    K: WatchedObject,
    S: WatchSource<K> + 'static,
{
    let reconcile_loop = ReconcileLoop::new(kind, source, dispatcher, metrics, config);
    let status = reconcile_loop.status();
    let handle = tokio::spawn(reconcile_loop.run(cancel));
    KindTask { kind, status, handle }
}

/// Starts the per-kind loops against a live cluster.
#[derive(Clone)]
pub struct Orchestrator {
    client: kube::Client,
    dispatcher: Arc<dyn Dispatcher>,
    metrics: EngineMetrics,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator").finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator sharing one client, dispatcher and metrics set.
    #[must_use]
    pub fn new(client: kube::Client, dispatcher: Arc<dyn Dispatcher>, metrics: EngineMetrics) -> Self {
        Self {
            client,
            dispatcher,
            metrics,
        }
    }

    /// Start one loop per kind and return immediately.
    ///
    /// Loops run until `cancel` fires. Duplicate kinds are started once.
    #[must_use]
    pub fn start(&self, kinds: &[ResourceKind], config: &LoopConfig, cancel: &CancellationToken) -> Vec<KindTask> {
        let mut started: Vec<ResourceKind> = Vec::with_capacity(kinds.len());
        let mut tasks = Vec::with_capacity(kinds.len());
        for &kind in kinds {
            if started.contains(&kind) {
                continue;
            }
            started.push(kind);
            info!(kind = %kind, "Starting watcher");
            tasks.push(self.start_kind(kind, config.clone(), cancel.child_token()));
        }
        tasks
    }

    fn start_kind(&self, kind: ResourceKind, config: LoopConfig, cancel: CancellationToken) -> KindTask {
        match kind {
            ResourceKind::Pod => self.spawn_typed::<Pod>(kind, config, cancel),
            ResourceKind::Service => self.spawn_typed::<Service>(kind, config, cancel),
            ResourceKind::ReplicationController => self.spawn_typed::<ReplicationController>(kind, config, cancel),
            ResourceKind::Deployment => self.spawn_typed::<Deployment>(kind, config, cancel),
            ResourceKind::Job => self.spawn_typed::<Job>(kind, config, cancel),
            ResourceKind::PersistentVolume => self.spawn_typed::<PersistentVolume>(kind, config, cancel),
        }
    }

    fn spawn_typed<K: WatchedObject>(&self, kind: ResourceKind, config: LoopConfig, cancel: CancellationToken) -> KindTask {
        spawn_loop(
            kind,
            KubeWatchSource::<K>::all(self.client.clone()),
            Arc::clone(&self.dispatcher),
            self.metrics.clone(),
            config,
            cancel,
        )
    }
}
