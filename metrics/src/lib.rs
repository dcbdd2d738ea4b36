//! Backend-agnostic metrics API.
//!
//! Components create their instruments through a [`Metrics`] implementation
//! and keep them as trait objects. [`NoMetrics`] discards everything.

use std::fmt::Debug;

use dyn_clone::DynClone;

/// A monotonically increasing value.
pub trait Counter: DynClone + Debug + Send + Sync {
    fn add(&self, amount: usize);
}

/// A value that can go up and down.
pub trait Gauge: DynClone + Debug + Send + Sync {
    fn set(&self, amount: usize);

    fn update(&self, delta: i64);
}

/// A distribution of observed values.
pub trait Histogram: DynClone + Debug + Send + Sync {
    fn add_point(&self, point: f64);
}

dyn_clone::clone_trait_object!(Counter);
dyn_clone::clone_trait_object!(Gauge);
dyn_clone::clone_trait_object!(Histogram);

/// Factory of metric instruments.
pub trait Metrics: Send + Sync {
    fn create_counter(&self, name: &str, unit_label: Option<&str>) -> Box<dyn Counter>;

    fn create_gauge(&self, name: &str, unit_label: Option<&str>) -> Box<dyn Gauge>;

    fn create_histogram(&self, name: &str, unit_label: Option<&str>) -> Box<dyn Histogram>;
}

/// Metrics implementation that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMetrics;

impl Metrics for NoMetrics {
    fn create_counter(&self, _: &str, _: Option<&str>) -> Box<dyn Counter> {
        Box::new(Self)
    }

    fn create_gauge(&self, _: &str, _: Option<&str>) -> Box<dyn Gauge> {
        Box::new(Self)
    }

    fn create_histogram(&self, _: &str, _: Option<&str>) -> Box<dyn Histogram> {
        Box::new(Self)
    }
}

impl Counter for NoMetrics {
    fn add(&self, _: usize) {}
}

impl Gauge for NoMetrics {
    fn set(&self, _: usize) {}

    fn update(&self, _: i64) {}
}

impl Histogram for NoMetrics {
    fn add_point(&self, _: f64) {}
}
