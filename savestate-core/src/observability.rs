/*!
Observability setup for savestate.

- Structured logging through `tracing`, installed with [`init_observability`]
- Prometheus counters for saves and loads (feature `metrics`)
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{Result, SaveError};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "savestate=info";

#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<SaveMetrics>> = OnceLock::new();

/// Save and load counters
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct SaveMetrics {
    pub local_saves_total: Counter,
    pub cloud_saves_total: Counter,
    pub loads_total: Counter,
    pub failures_total: CounterVec,
    pub blob_size_bytes: Histogram,

    registry: Registry,
}

#[cfg(feature = "metrics")]
fn metric_error(name: &str, e: prometheus::Error) -> SaveError {
    SaveError::storage(format!("Failed to set up {name} metric: {e}"))
}

#[cfg(feature = "metrics")]
impl SaveMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let local_saves_total = Counter::new(
            "savestate_local_saves_total",
            "Successful saves to the local backend",
        )
        .map_err(|e| metric_error("local_saves_total", e))?;

        let cloud_saves_total = Counter::new(
            "savestate_cloud_saves_total",
            "Successful saves mirrored to the cloud backend",
        )
        .map_err(|e| metric_error("cloud_saves_total", e))?;

        let loads_total = Counter::new(
            "savestate_loads_total",
            "Records loaded from either backend",
        )
        .map_err(|e| metric_error("loads_total", e))?;

        let failures_total = CounterVec::new(
            Opts::new("savestate_failures_total", "Failed save and load operations"),
            &["operation"],
        )
        .map_err(|e| metric_error("failures_total", e))?;

        let blob_size_bytes = Histogram::with_opts(
            HistogramOpts::new("savestate_blob_size_bytes", "Size of encoded records")
                .buckets(prometheus::exponential_buckets(256.0, 4.0, 8).map_err(|e| {
                    metric_error("blob_size_bytes", e)
                })?),
        )
        .map_err(|e| metric_error("blob_size_bytes", e))?;

        registry
            .register(Box::new(local_saves_total.clone()))
            .map_err(|e| metric_error("local_saves_total", e))?;
        registry
            .register(Box::new(cloud_saves_total.clone()))
            .map_err(|e| metric_error("cloud_saves_total", e))?;
        registry
            .register(Box::new(loads_total.clone()))
            .map_err(|e| metric_error("loads_total", e))?;
        registry
            .register(Box::new(failures_total.clone()))
            .map_err(|e| metric_error("failures_total", e))?;
        registry
            .register(Box::new(blob_size_bytes.clone()))
            .map_err(|e| metric_error("blob_size_bytes", e))?;

        Ok(Self {
            local_saves_total,
            cloud_saves_total,
            loads_total,
            failures_total,
            blob_size_bytes,
            registry,
        })
    }

    /// The process-wide metrics, or `None` if they could not be registered
    pub fn global() -> Option<&'static SaveMetrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::warn!(error = %e, "Metrics disabled");
                    None
                }
            })
            .as_ref()
    }

    pub fn record_local_save(&self, size_bytes: usize) {
        self.local_saves_total.inc();
        self.blob_size_bytes.observe(size_bytes as f64);
    }

    pub fn record_cloud_save(&self, size_bytes: usize) {
        self.cloud_saves_total.inc();
        self.blob_size_bytes.observe(size_bytes as f64);
    }

    pub fn record_load(&self) {
        self.loads_total.inc();
    }

    pub fn record_failure(&self, operation: &str) {
        self.failures_total.with_label_values(&[operation]).inc();
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| SaveError::storage(format!("Failed to encode metrics: {e}")))?;
        String::from_utf8(buffer)
            .map_err(|e| SaveError::storage(format!("Failed to convert metrics to string: {e}")))
    }
}

/// Gather the process-wide metrics in Prometheus text format
#[cfg(feature = "metrics")]
pub fn gather_metrics() -> Result<String> {
    SaveMetrics::global()
        .ok_or_else(|| SaveError::storage("Metrics are not available"))?
        .gather_metrics()
}

/// Install the global tracing subscriber
///
/// Log levels come from `RUST_LOG`, falling back to [`DEFAULT_LOG_FILTER`].
/// With `json` set, events are written as one JSON object per line.
///
/// # Errors
/// Fails if a global subscriber is already installed.
pub fn init_observability(json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    SaveMetrics::global();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let json_layer = json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false)
    });
    let text_layer = (!json).then(|| tracing_subscriber::fmt::layer().with_target(false));

    let subscriber = TracingRegistry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer);

    set_global_default(subscriber).map_err(|e| {
        SaveError::storage(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::info!(json, "savestate observability initialized");
    Ok(())
}

/// Initialize observability with plain-text output
pub fn init_default_observability() -> Result<()> {
    init_observability(false)
}
