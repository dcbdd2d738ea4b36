use std::collections::HashMap;
use std::sync::Arc;

use ::prometheus::{Encoder, Opts, Registry, TextEncoder};
use metrics::{Counter, Gauge, Histogram, Metrics, NoMetrics};
use parking_lot::RwLock;
use tracing::warn;

const NAMESPACE: &str = "ibft";

#[derive(Clone, Debug)]
pub struct PromCounter(::prometheus::Counter);

impl Counter for PromCounter {
    fn add(&self, amount: usize) {
        self.0.inc_by(amount as f64)
    }
}

#[derive(Clone, Debug)]
pub struct PromGauge(::prometheus::Gauge);

impl Gauge for PromGauge {
    fn set(&self, amount: usize) {
        self.0.set(amount as f64)
    }

    fn update(&self, delta: i64) {
        self.0.add(delta as f64)
    }
}

#[derive(Clone, Debug)]
pub struct PromHistogram(::prometheus::Histogram);

impl Histogram for PromHistogram {
    fn add_point(&self, point: f64) {
        self.0.observe(point)
    }
}

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum PrometheusError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] ::prometheus::Error),

    #[error("metrics output is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// A `Metrics` implementation backed by a prometheus registry.
///
/// Instruments that can not be registered (e.g. because their name is
/// taken) are replaced by no-ops.
#[derive(Clone, Debug, Default)]
pub struct PrometheusMetrics {
    registry: Registry,
    counters: Arc<RwLock<HashMap<String, PromCounter>>>,
    gauges: Arc<RwLock<HashMap<String, PromGauge>>>,
    histograms: Arc<RwLock<HashMap<String, PromHistogram>>>,
}

impl PrometheusMetrics {
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the prometheus text format.
    pub fn export(&self) -> Result<String, PrometheusError> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    fn opts(name: &str, unit_label: Option<&str>) -> Opts {
        Opts::new(name, unit_label.unwrap_or(name)).namespace(NAMESPACE)
    }

    fn register<C>(&self, name: &str, c: Result<C, ::prometheus::Error>) -> Option<C>
    where
        C: ::prometheus::core::Collector + Clone + 'static,
    {
        let result = c.and_then(|c| {
            self.registry.register(Box::new(c.clone()))?;
            Ok(c)
        });
        match result {
            Ok(c) => Some(c),
            Err(err) => {
                warn!(%name, %err, "failed to register metric");
                None
            }
        }
    }
}

impl Metrics for PrometheusMetrics {
    fn create_counter(&self, name: &str, unit_label: Option<&str>) -> Box<dyn Counter> {
        let c = ::prometheus::Counter::with_opts(Self::opts(name, unit_label));
        let Some(c) = self.register(name, c) else {
            return Box::new(NoMetrics);
        };
        let c = PromCounter(c);
        self.counters.write().insert(name.to_string(), c.clone());
        Box::new(c)
    }

    fn create_gauge(&self, name: &str, unit_label: Option<&str>) -> Box<dyn Gauge> {
        let g = ::prometheus::Gauge::with_opts(Self::opts(name, unit_label));
        let Some(g) = self.register(name, g) else {
            return Box::new(NoMetrics);
        };
        let g = PromGauge(g);
        self.gauges.write().insert(name.to_string(), g.clone());
        Box::new(g)
    }

    fn create_histogram(&self, name: &str, unit_label: Option<&str>) -> Box<dyn Histogram> {
        let h = ::prometheus::Histogram::with_opts(Self::opts(name, unit_label).into());
        let Some(h) = self.register(name, h) else {
            return Box::new(NoMetrics);
        };
        let h = PromHistogram(h);
        self.histograms.write().insert(name.to_string(), h.clone());
        Box::new(h)
    }
}
