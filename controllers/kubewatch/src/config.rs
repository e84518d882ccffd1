//! Process configuration.
//!
//! Read from a YAML file, then overridden by environment variables:
//!
//! - `KUBEWATCH_CONFIG`: path of the YAML file (default `$HOME/.kubewatch.yaml`
//!   when it exists, otherwise built-in defaults)
//! - `KUBEWATCH_WEBHOOK_URL`: webhook endpoint
//! - `KUBEWATCH_HEALTH_PORT`: port of the health/metrics listener
//! - `KUBEWATCH_RESYNC_SECONDS`: period of the full re-list

use crate::error::ControllerError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use watch_engine::{LoopConfig, ResourceKind};

const CONFIG_ENV: &str = "KUBEWATCH_CONFIG";
const WEBHOOK_URL_ENV: &str = "KUBEWATCH_WEBHOOK_URL";
const HEALTH_PORT_ENV: &str = "KUBEWATCH_HEALTH_PORT";
const RESYNC_SECONDS_ENV: &str = "KUBEWATCH_RESYNC_SECONDS";
const DEFAULT_FILE_NAME: &str = ".kubewatch.yaml";

/// Which kinds to watch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
#[allow(clippy::struct_excessive_bools, reason = "one toggle per watchable kind, mirroring the config file")]
pub struct ResourceConfig {
    /// Watch pods
    pub pod: bool,
    /// Watch services
    pub services: bool,
    /// Watch replication controllers
    pub replication_controller: bool,
    /// Watch deployments
    pub deployment: bool,
    /// Watch jobs
    pub job: bool,
    /// Watch persistent volumes
    pub persistent_volume: bool,
}

impl ResourceConfig {
    /// Every kind enabled.
    #[must_use]
    pub fn all() -> Self {
        Self {
            pod: true,
            services: true,
            replication_controller: true,
            deployment: true,
            job: true,
            persistent_volume: true,
        }
    }

    fn is_enabled(&self, kind: ResourceKind) -> bool {
        match kind {
            ResourceKind::Pod => self.pod,
            ResourceKind::Service => self.services,
            ResourceKind::ReplicationController => self.replication_controller,
            ResourceKind::Deployment => self.deployment,
            ResourceKind::Job => self.job,
            ResourceKind::PersistentVolume => self.persistent_volume,
        }
    }
}

/// Webhook handler settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Endpoint receiving one POST per change event
    pub url: Option<String>,
}

/// Notification handler settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Webhook handler; the log handler is used when no URL is set
    pub webhook: WebhookConfig,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Kinds to watch (every kind when the section is absent)
    pub resource: ResourceConfig,
    /// Where notifications go
    pub handler: HandlerConfig,
    /// Port of the `/healthz`, `/readyz` and `/metrics` listener
    pub health_port: u16,
    /// Period of the full re-list, in seconds
    pub resync_seconds: u64,
    /// Report updates for every kind, not only services
    pub notify_all_updates: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            resource: ResourceConfig::all(),
            handler: HandlerConfig::default(),
            health_port: 8081,
            resync_seconds: 1800,
            notify_all_updates: false,
        }
    }
}

impl Config {
    /// Load from the file and environment of the current process, then
    /// validate.
    pub fn load() -> Result<Self, ControllerError> {
        let lookup = |name: &str| std::env::var(name).ok();
        let mut config = match Self::resolve_path(lookup) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Config file to read, if any.
    ///
    /// An explicit `KUBEWATCH_CONFIG` always wins, even if the file is
    /// missing (reading it then fails). The home-directory file is only
    /// used when it exists.
    pub fn resolve_path<F>(lookup: F) -> Option<PathBuf>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(CONFIG_ENV).filter(|p| !p.is_empty()) {
            return Some(PathBuf::from(path));
        }
        let home = lookup("HOME")?;
        let candidate = Path::new(&home).join(DEFAULT_FILE_NAME);
        candidate.is_file().then_some(candidate)
    }

    /// Read and parse a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ControllerError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
            .map_err(|e| ControllerError::InvalidConfig(format!("{}: {}", path.display(), e)))
    }

    /// Parse YAML. Missing fields take their defaults.
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(raw)
    }

    /// Apply the `KUBEWATCH_*` overrides.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(WEBHOOK_URL_ENV) {
            self.handler.webhook.url = Some(url);
        }
        if let Some(port) = lookup(HEALTH_PORT_ENV) {
            self.health_port = port.trim().parse().map_err(|e| {
                ControllerError::InvalidConfig(format!("{HEALTH_PORT_ENV} is not a valid port: {port} ({e})"))
            })?;
        }
        if let Some(secs) = lookup(RESYNC_SECONDS_ENV) {
            self.resync_seconds = secs.trim().parse().map_err(|e| {
                ControllerError::InvalidConfig(format!("{RESYNC_SECONDS_ENV} is not a number: {secs} ({e})"))
            })?;
        }
        Ok(())
    }

    /// Reject configurations the controller cannot run with.
    pub fn validate(&self) -> Result<(), ControllerError> {
        if self.enabled_kinds().is_empty() {
            return Err(ControllerError::InvalidConfig(
                "no resource kind enabled under `resource`".to_string(),
            ));
        }
        if self.resync_seconds == 0 {
            return Err(ControllerError::InvalidConfig(
                "resyncSeconds must be greater than zero".to_string(),
            ));
        }
        if let Some(url) = self.webhook_url() {
            let parsed = reqwest::Url::parse(url)
                .map_err(|e| ControllerError::InvalidConfig(format!("invalid webhook url {url}: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ControllerError::InvalidConfig(format!(
                    "webhook url must use http or https: {url}"
                )));
            }
        }
        Ok(())
    }

    /// Configured webhook URL, ignoring an empty string.
    #[must_use]
    pub fn webhook_url(&self) -> Option<&str> {
        self.handler
            .webhook
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }

    /// Enabled kinds, in a fixed order.
    #[must_use]
    pub fn enabled_kinds(&self) -> Vec<ResourceKind> {
        ResourceKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.resource.is_enabled(*kind))
            .collect()
    }

    /// Loop settings derived from this configuration.
    #[must_use]
    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            resync_period: Duration::from_secs(self.resync_seconds),
            notify_all_updates: self.notify_all_updates,
            ..LoopConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_watch_every_kind() {
        let config = Config::default();
        assert_eq!(config.enabled_kinds(), ResourceKind::ALL.to_vec());
        assert_eq!(config.health_port, 8081);
        assert_eq!(config.loop_config().resync_period, Duration::from_secs(1800));
        assert!(config.webhook_url().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let raw = r"
resource:
  pod: true
  services: true
handler:
  webhook:
    url: http://hooks.local/kubewatch
healthPort: 9000
resyncSeconds: 60
notifyAllUpdates: true
";
        let config = Config::from_yaml(raw).unwrap();
        assert_eq!(config.enabled_kinds(), vec![ResourceKind::Pod, ResourceKind::Service]);
        assert_eq!(config.webhook_url(), Some("http://hooks.local/kubewatch"));
        assert_eq!(config.health_port, 9000);

        let loop_config = config.loop_config();
        assert_eq!(loop_config.resync_period, Duration::from_secs(60));
        assert!(loop_config.notify_all_updates);
    }

    #[test]
    fn test_partial_resource_section_disables_the_rest() {
        let config = Config::from_yaml("resource:\n  persistentVolume: true\n").unwrap();
        assert_eq!(config.enabled_kinds(), vec![ResourceKind::PersistentVolume]);
        assert_eq!(config.resync_seconds, 1800);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        assert_eq!(Config::from_yaml("").unwrap(), Config::default());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(env(&[
                ("KUBEWATCH_WEBHOOK_URL", "https://example.com/hook"),
                ("KUBEWATCH_HEALTH_PORT", "9100"),
                ("KUBEWATCH_RESYNC_SECONDS", "30"),
            ]))
            .unwrap();
        assert_eq!(config.webhook_url(), Some("https://example.com/hook"));
        assert_eq!(config.health_port, 9100);
        assert_eq!(config.resync_seconds, 30);
    }

    #[test]
    fn test_bad_env_override_is_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env_overrides(env(&[("KUBEWATCH_HEALTH_PORT", "not-a-port")]))
            .unwrap_err();
        assert!(matches!(err, ControllerError::InvalidConfig(_)));
        assert!(err.to_string().contains("invalid digit"), "{err}");

        let err = config
            .apply_env_overrides(env(&[("KUBEWATCH_HEALTH_PORT", "70000")]))
            .unwrap_err();
        assert!(err.to_string().contains("too large"), "{err}");

        let err = config
            .apply_env_overrides(env(&[("KUBEWATCH_RESYNC_SECONDS", "-5")]))
            .unwrap_err();
        assert!(err.to_string().contains("KUBEWATCH_RESYNC_SECONDS"), "{err}");
        assert!(err.to_string().contains("invalid digit"), "{err}");
    }

    #[test]
    fn test_validation() {
        let mut none_enabled = Config::default();
        none_enabled.resource = ResourceConfig::default();
        assert!(none_enabled.validate().is_err());

        let mut zero_resync = Config::default();
        zero_resync.resync_seconds = 0;
        assert!(zero_resync.validate().is_err());

        let mut bad_url = Config::default();
        bad_url.handler.webhook.url = Some("not a url".to_string());
        assert!(bad_url.validate().is_err());

        let mut wrong_scheme = Config::default();
        wrong_scheme.handler.webhook.url = Some("ftp://example.com/hook".to_string());
        assert!(wrong_scheme.validate().is_err());

        let mut blank_url = Config::default();
        blank_url.handler.webhook.url = Some(String::new());
        assert!(blank_url.validate().is_ok());
        assert!(blank_url.webhook_url().is_none());
    }

    #[test]
    fn test_explicit_path_wins() {
        let path = Config::resolve_path(env(&[("KUBEWATCH_CONFIG", "/etc/kubewatch/config.yaml")]));
        assert_eq!(path, Some(PathBuf::from("/etc/kubewatch/config.yaml")));
    }

    #[test]
    fn test_home_file_used_only_when_present() {
        let dir = std::env::temp_dir().join(format!("kubewatch-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let home = dir.to_string_lossy().to_string();

        assert_eq!(Config::resolve_path(env(&[("HOME", home.as_str())])), None);

        let file = dir.join(".kubewatch.yaml");
        std::fs::write(&file, "resource:\n  job: true\n").unwrap();
        assert_eq!(Config::resolve_path(env(&[("HOME", home.as_str())])), Some(file.clone()));

        let config = Config::from_file(&file).unwrap();
        assert_eq!(config.enabled_kinds(), vec![ResourceKind::Job]);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
