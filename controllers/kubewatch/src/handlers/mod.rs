//! Notification handlers.
//!
//! Every handler implements [`Dispatcher`]. The webhook handler is used when
//! a URL is configured, otherwise transitions are only logged.

mod log;
mod webhook;

pub use log::LogHandler;
pub use webhook::WebhookHandler;

use crate::config::Config;
use crate::error::ControllerError;
use std::sync::Arc;
use tracing::info;
use watch_engine::Dispatcher;

/// Build the handler selected by `config`.
pub fn from_config(config: &Config) -> Result<Arc<dyn Dispatcher>, ControllerError> {
    match config.webhook_url() {
        Some(url) => {
            info!("Using webhook handler: {}", url);
            Ok(Arc::new(WebhookHandler::new(url)?))
        }
        None => {
            info!("No webhook configured, logging events only");
            Ok(Arc::new(LogHandler))
        }
    }
}
