//! Resource watch-and-dispatch engine
//!
//! Keeps an in-memory mirror of one Kubernetes resource kind per reconciliation
//! loop and reports every create/update/delete to a shared [`Dispatcher`].
//!
//! Each loop lists the kind, streams watch events from the list's resource
//! version and re-lists on stream loss, watch expiry, or a fixed resync period.
//! A re-list is diffed against the mirror so missed events are synthesized,
//! which gives eventual convergence rather than a gapless event log.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use watch_engine::{EngineMetrics, LoopConfig, Orchestrator, ResourceKind};
//!
//! # async fn example(dispatcher: Arc<dyn watch_engine::Dispatcher>) -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let metrics = EngineMetrics::new()?;
//! let orchestrator = Orchestrator::new(client, dispatcher, metrics);
//!
//! let cancel = CancellationToken::new();
//! let tasks = orchestrator.start(&[ResourceKind::Pod, ResourceKind::Service], &LoopConfig::default(), &cancel);
//! for task in tasks {
//!     task.handle.await??;
//! }
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod dispatcher;
pub mod error;
pub mod kind;
pub mod metrics;
pub mod mirror;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod object;
pub mod orchestrator;
pub mod reconcile;
pub mod source;

pub use backoff::ExponentialBackoff;
pub use dispatcher::{Action, ChangeEvent, Dispatcher};
pub use error::{EngineError, HandlerError, WatchError};
pub use kind::ResourceKind;
pub use metrics::EngineMetrics;
pub use mirror::{Mirror, MirrorReader};
pub use object::{ObjectKey, ObjectSnapshot, ResourceVersion, WatchedObject};
pub use orchestrator::{KindTask, Orchestrator, spawn_loop};
pub use reconcile::{LoopConfig, LoopState, LoopStatus, ReconcileLoop};
pub use source::{KubeWatchSource, Listing, WatchRecord, WatchSource, WatchStream};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockWatchSource, RecordedEvent, RecordingDispatcher};
