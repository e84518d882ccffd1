//! Main controller implementation.
//!
//! The `Controller` wires the Kubernetes client, the notification handler and
//! the health listener to one reconciliation loop per enabled kind, then
//! supervises them until shutdown.

use crate::config::Config;
use crate::error::ControllerError;
use crate::handlers;
use crate::health::{self, HealthState};
use kube::Client;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use watch_engine::{EngineError, EngineMetrics, KindTask, Orchestrator, ResourceKind};

/// Top-level controller.
pub struct Controller {
    config: Config,
    orchestrator: Orchestrator,
    metrics: EngineMetrics,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing kubewatch controller");

        let client = Client::try_default().await?;
        let metrics = EngineMetrics::new().map_err(EngineError::from)?;
        let dispatcher = handlers::from_config(&config)?;
        let orchestrator = Orchestrator::new(client, dispatcher, metrics.clone());

        Ok(Self {
            config,
            orchestrator,
            metrics,
        })
    }

    /// Runs the controller until Ctrl-C/SIGTERM or until a watcher fails.
    pub async fn run(self) -> Result<(), ControllerError> {
        let cancel = CancellationToken::new();
        let kinds = self.config.enabled_kinds();
        let tasks = self.orchestrator.start(&kinds, &self.config.loop_config(), &cancel);

        let state = HealthState::new(
            self.metrics.clone(),
            tasks.iter().map(|t| (t.kind, t.status.clone())).collect(),
        );
        let health = tokio::spawn(health::serve(self.config.health_port, state, cancel.child_token()));

        info!("Controller started, watching {} kind(s)", tasks.len());
        supervise(tasks, cancel, stop_condition(health)).await
    }
}

/// Resolves with `Ok` on a shutdown signal, or with the error that stopped the
/// health listener.
async fn stop_condition(health: JoinHandle<Result<(), ControllerError>>) -> Result<(), ControllerError> {
    tokio::select! {
        () = shutdown_signal() => Ok(()),
        result = health => {
            match result {
                Ok(Ok(())) => Err(ControllerError::Http("health server stopped".to_string())),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(ControllerError::Http(format!("health server panicked: {}", e))),
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl-C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Wait for `stop` or for the first watcher to exit, then cancel every
/// watcher and wait for all of them.
///
/// Loops only return on cancellation, so a watcher exiting first is always
/// an error, as is any watcher failing or panicking during shutdown.
pub(crate) async fn supervise<F>(
    tasks: Vec<KindTask>,
    cancel: CancellationToken,
    stop: F,
) -> Result<(), ControllerError>
where
    F: Future<Output = Result<(), ControllerError>>,
{
    let (mut kinds, mut handles): (Vec<ResourceKind>, Vec<_>) =
        tasks.into_iter().map(|t| (t.kind, t.handle)).unzip();
    if handles.is_empty() {
        return Err(ControllerError::InvalidConfig("no watchers started".to_string()));
    }

    let first_exit = tokio::select! {
        result = stop => {
            if let Err(e) = &result {
                error!("Stopping: {}", e);
            }
            result.map(|()| None)
        }
        (result, index, _) = futures::future::select_all(handles.iter_mut()) => Ok(Some((index, result))),
    };

    cancel.cancel();

    let mut outcome = match first_exit {
        Ok(None) => Ok(()),
        Ok(Some((index, result))) => {
            let kind = kinds.remove(index);
            drop(handles.remove(index));
            Err(exit_error(kind, result))
        }
        Err(e) => Err(e),
    };

    for (kind, handle) in kinds.into_iter().zip(handles) {
        let result = handle.await;
        if matches!(result, Ok(Ok(()))) {
            continue;
        }
        let err = exit_error(kind, result);
        if outcome.is_ok() {
            outcome = Err(err);
        } else {
            warn!("Watcher failed during shutdown: {}", err);
        }
    }

    match &outcome {
        Ok(()) => info!("All watchers stopped"),
        Err(e) => error!("Controller stopping with error: {}", e),
    }
    outcome
}

fn exit_error(
    kind: ResourceKind,
    result: Result<Result<(), EngineError>, tokio::task::JoinError>,
) -> ControllerError {
    match result {
        Ok(Ok(())) => ControllerError::Watch(format!("{} watcher exited unexpectedly", kind)),
        Ok(Err(e)) => ControllerError::Engine(e),
        Err(e) => ControllerError::Watch(format!("{} watcher panicked: {}", kind, e)),
    }
}
