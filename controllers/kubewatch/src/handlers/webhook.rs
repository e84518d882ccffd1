//! Webhook handler
//!
//! POSTs one JSON document per change event to a configured URL.

use crate::error::ControllerError;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;
use watch_engine::{Action, Dispatcher, HandlerError, ObjectSnapshot, ResourceKind};

/// Body of a webhook notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    /// Unique id of this notification
    pub event_id: String,
    /// Kind of the object
    pub kind: ResourceKind,
    /// `added`, `updated` or `deleted`
    pub action: String,
    /// Namespace, absent for cluster-scoped kinds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
    /// Resource version the event refers to
    pub resource_version: String,
    /// When the notification was produced (RFC 3339)
    pub timestamp: String,
    /// Human-readable summary
    pub text: String,
}

impl WebhookPayload {
    /// Build the payload for one transition of `obj`.
    #[must_use]
    pub fn new(action: Action, obj: &ObjectSnapshot) -> Self {
        let text = format!("`{}` object `{}` has been {}", obj.kind, obj.key, action);
        Self {
            event_id: Uuid::new_v4().to_string(),
            kind: obj.kind,
            action: action.as_str().to_string(),
            namespace: obj.key.namespace.clone(),
            name: obj.key.name.clone(),
            resource_version: obj.resource_version.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            text,
        }
    }
}

/// Delivers change events to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct WebhookHandler {
    client: Client,
    url: String,
}

impl WebhookHandler {
    /// Create a handler posting to `url`.
    pub fn new(url: &str) -> Result<Self, ControllerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ControllerError::InvalidConfig(format!("cannot build webhook client: {e}")))?;

        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    async fn post(&self, action: Action, obj: &ObjectSnapshot) -> Result<(), HandlerError> {
        let payload = WebhookPayload::new(action, obj);
        debug!(event_id = %payload.event_id, key = %obj.key, "Posting webhook");

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| HandlerError::Delivery(format!("POST {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HandlerError::Rejected(format!("{} - {}", status, body)));
        }
        Ok(())
    }
}

#[async_trait]
impl Dispatcher for WebhookHandler {
    async fn on_added(&self, obj: &ObjectSnapshot) -> Result<(), HandlerError> {
        self.post(Action::Added, obj).await
    }

    async fn on_updated(&self, _old: &ObjectSnapshot, new: &ObjectSnapshot) -> Result<(), HandlerError> {
        self.post(Action::Updated, new).await
    }

    async fn on_deleted(&self, obj: &ObjectSnapshot) -> Result<(), HandlerError> {
        self.post(Action::Deleted, obj).await
    }
}
