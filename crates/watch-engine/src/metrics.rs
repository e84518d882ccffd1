//! Prometheus metrics for the reconciliation loops.

use crate::kind::ResourceKind;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};

/// Counters and gauges shared by every loop. Cloning shares the underlying
/// registry.
#[derive(Clone, Debug)]
pub struct EngineMetrics {
    registry: Registry,
    events: IntCounterVec,
    resyncs: IntCounterVec,
    handler_failures: IntCounterVec,
    api_errors: IntCounterVec,
    mirror_objects: IntGaugeVec,
}

impl EngineMetrics {
    /// Create the metric families and register them in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let events = IntCounterVec::new(
            Opts::new("kubewatch_events_total", "Change events dispatched to the handler"),
            &["kind", "action"],
        )?;
        let resyncs = IntCounterVec::new(
            Opts::new("kubewatch_resyncs_total", "Full re-lists performed"),
            &["kind", "reason"],
        )?;
        let handler_failures = IntCounterVec::new(
            Opts::new(
                "kubewatch_handler_failures_total",
                "Change events dropped after the handler kept failing",
            ),
            &["kind"],
        )?;
        let api_errors = IntCounterVec::new(
            Opts::new("kubewatch_api_errors_total", "List/watch errors returned by the API server"),
            &["kind", "error"],
        )?;
        let mirror_objects = IntGaugeVec::new(
            Opts::new("kubewatch_mirror_objects", "Objects currently held in the mirror"),
            &["kind"],
        )?;

        registry.register(Box::new(events.clone()))?;
        registry.register(Box::new(resyncs.clone()))?;
        registry.register(Box::new(handler_failures.clone()))?;
        registry.register(Box::new(api_errors.clone()))?;
        registry.register(Box::new(mirror_objects.clone()))?;

        Ok(Self {
            registry,
            events,
            resyncs,
            handler_failures,
            api_errors,
            mirror_objects,
        })
    }

    /// Registry holding every engine metric.
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn event_dispatched(&self, kind: ResourceKind, action: &str) {
        self.events.with_label_values(&[kind.as_str(), action]).inc();
    }

    pub(crate) fn resync(&self, kind: ResourceKind, reason: &str) {
        self.resyncs.with_label_values(&[kind.as_str(), reason]).inc();
    }

    pub(crate) fn handler_failure(&self, kind: ResourceKind) {
        self.handler_failures.with_label_values(&[kind.as_str()]).inc();
    }

    pub(crate) fn api_error(&self, kind: ResourceKind, error: &str) {
        self.api_errors.with_label_values(&[kind.as_str(), error]).inc();
    }

    pub(crate) fn mirror_size(&self, kind: ResourceKind, len: usize) {
        let len = i64::try_from(len).unwrap_or(i64::MAX);
        self.mirror_objects.with_label_values(&[kind.as_str()]).set(len);
    }

    /// Number of dispatched events for a kind/action pair.
    #[must_use]
    pub fn events_dispatched(&self, kind: ResourceKind, action: &str) -> u64 {
        self.events.with_label_values(&[kind.as_str(), action]).get()
    }

    /// Number of dead-lettered events for a kind.
    #[must_use]
    pub fn handler_failures(&self, kind: ResourceKind) -> u64 {
        self.handler_failures.with_label_values(&[kind.as_str()]).get()
    }

    /// Render all metrics in the Prometheus text exposition format.
    pub fn gather_text(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
