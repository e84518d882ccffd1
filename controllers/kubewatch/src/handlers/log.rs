//! Handler that writes one log line per transition.

use async_trait::async_trait;
use tracing::info;
use watch_engine::{Action, Dispatcher, HandlerError, ObjectSnapshot};

/// Logs every change event at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHandler;

impl LogHandler {
    fn log(action: Action, obj: &ObjectSnapshot) {
        info!(
            kind = %obj.kind,
            action = %action,
            key = %obj.key,
            resource_version = %obj.resource_version,
            "Resource {}",
            action
        );
    }
}

#[async_trait]
impl Dispatcher for LogHandler {
    async fn on_added(&self, obj: &ObjectSnapshot) -> Result<(), HandlerError> {
        Self::log(Action::Added, obj);
        Ok(())
    }

    async fn on_updated(&self, _old: &ObjectSnapshot, new: &ObjectSnapshot) -> Result<(), HandlerError> {
        Self::log(Action::Updated, new);
        Ok(())
    }

    async fn on_deleted(&self, obj: &ObjectSnapshot) -> Result<(), HandlerError> {
        Self::log(Action::Deleted, obj);
        Ok(())
    }
}
