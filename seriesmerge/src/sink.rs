//! The boundary that receives finalized records.
//!
//! A [`Sink`] is whatever sits downstream of the merge buffer: an output
//! writer, a network batcher, a test harness. The buffer only ever calls
//! [`Sink::set_precision`] and [`Sink::deliver`].

use std::time::Duration;

use crate::metric::Metric;

/// Receiver of emitted records.
pub trait Sink {
    /// Sets the timestamp precision the sink should keep.
    ///
    /// The merge buffer always requests one nanosecond before delivering, so
    /// records are not rounded to a coarser host default.
    fn set_precision(&mut self, precision: Duration);

    /// Accepts one finalized record. Called once per record, in emission order.
    fn deliver(&mut self, metric: Metric);
}

/// Default precision of a [`CollectingSink`].
pub const DEFAULT_PRECISION: Duration = Duration::from_secs(1);

/// An in-memory sink that keeps delivered records.
///
/// Timestamps are rounded to the current precision on delivery, the way a
/// host accumulator applies its agent-wide precision.
#[derive(Debug, Clone)]
pub struct CollectingSink {
    precision: Duration,
    metrics: Vec<Metric>,
}

impl Default for CollectingSink {
    fn default() -> Self {
        Self::with_precision(DEFAULT_PRECISION)
    }
}

impl CollectingSink {
    /// Creates an empty sink with [`DEFAULT_PRECISION`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty sink with the given precision.
    pub fn with_precision(precision: Duration) -> Self {
        Self {
            precision,
            metrics: Vec::new(),
        }
    }

    /// Returns the current precision.
    pub fn precision(&self) -> Duration {
        self.precision
    }

    /// Returns the delivered records in delivery order.
    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    /// Removes and returns all delivered records.
    pub fn take(&mut self) -> Vec<Metric> {
        std::mem::take(&mut self.metrics)
    }

    /// Returns the number of delivered records.
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    /// Returns `true` if nothing has been delivered.
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

impl Sink for CollectingSink {
    fn set_precision(&mut self, precision: Duration) {
        self.precision = precision;
    }

    fn deliver(&mut self, mut metric: Metric) {
        metric.round_timestamp(self.precision);
        self.metrics.push(metric);
    }
}
