use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: Outcome,
}

/// Terminal state of one engine invocation.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Displayed,
    CredentialRequired,
    Error,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RevalidationLabels {
    pub result: RevalidationResult,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum RevalidationResult {
    Fresh,
    Stale,
    Failed,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EndpointLabels {
    pub endpoint: Endpoint,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Endpoint {
    Repo,
    Branch,
    Tree,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every Prometheus metric the size engine records.
pub struct Metrics {
    pub engine_invocations: Family<OutcomeLabels, Counter>,
    pub cache_hits: Counter,
    pub revalidations: Family<RevalidationLabels, Counter>,
    pub full_fetches: Counter,
    pub api_calls: Family<EndpointLabels, Counter>,
    pub rate_limit_remaining: Gauge,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let engine_invocations = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "reposize_engine_invocations",
            "Engine invocations by terminal outcome",
            engine_invocations.clone(),
        );

        let cache_hits = Counter::default();
        registry.register(
            "reposize_cache_hits",
            "Sizes served from a record younger than the TTL",
            cache_hits.clone(),
        );

        let revalidations = Family::<RevalidationLabels, Counter>::default();
        registry.register(
            "reposize_revalidations",
            "Head-commit revalidations of aged records by result",
            revalidations.clone(),
        );

        let full_fetches = Counter::default();
        registry.register(
            "reposize_full_fetches",
            "Full tree walks started",
            full_fetches.clone(),
        );

        let api_calls = Family::<EndpointLabels, Counter>::default();
        registry.register(
            "reposize_api_calls",
            "Remote API call count by endpoint",
            api_calls.clone(),
        );

        let rate_limit_remaining: Gauge = Gauge::default();
        registry.register(
            "reposize_rate_limit_remaining",
            "Remaining API calls before the rate limit",
            rate_limit_remaining.clone(),
        );

        Self {
            engine_invocations,
            cache_hits,
            revalidations,
            full_fetches,
            api_calls,
            rate_limit_remaining,
        }
    }

    pub fn record_outcome(&self, outcome: Outcome) {
        self.engine_invocations
            .get_or_create(&OutcomeLabels { outcome })
            .inc();
    }

    pub fn record_revalidation(&self, result: RevalidationResult) {
        self.revalidations
            .get_or_create(&RevalidationLabels { result })
            .inc();
    }

    pub fn record_api_call(&self, endpoint: Endpoint) {
        self.api_calls.get_or_create(&EndpointLabels { endpoint }).inc();
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry.
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let mut out = String::new();
        prometheus_client::encoding::text::encode(&mut out, &self.registry)
            .map_err(|e| anyhow::anyhow!("failed to encode metrics: {e}"))?;
        Ok(out)
    }
}
