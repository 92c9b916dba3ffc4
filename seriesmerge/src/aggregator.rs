//! Host-facing aggregator contract and a catalog of aggregator factories.
//!
//! A host pipeline drives aggregators through three calls: `add` for every
//! incoming metric, `push` on each periodic tick and `reset` once the push
//! has been handled. [`MergeBuffer`] implements that contract on top of its
//! accumulate/flush/commit protocol.
//!
//! The [`Catalog`] is an ordinary value owned by the host; it is created at
//! startup and dropped at teardown. There is no process-wide registry.
//!
//! # Example
//!
//! ```rust
//! use seriesmerge::aggregator::Catalog;
//! use seriesmerge::config::MergeConfig;
//! use seriesmerge::metric::Metric;
//! use seriesmerge::sink::CollectingSink;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let catalog = Catalog::with_builtin();
//! let mut merge = catalog.create("merge", &MergeConfig::default())?;
//!
//! merge.add(Metric::new("cpu", [("cpu", "cpu0")], 0).with_field("time_idle", 42)?);
//! merge.add(Metric::new("cpu", [("cpu", "cpu0")], 0).with_field("time_guest", 42)?);
//!
//! let mut sink = CollectingSink::new();
//! merge.push(&mut sink);
//! merge.reset();
//! assert_eq!(sink.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;

use crate::clock::Clock;
use crate::config::{MergeConfig, SAMPLE_CONFIG};
use crate::error::{CatalogError, Result};
use crate::merge::MergeBuffer;
use crate::metric::Metric;
use crate::sink::Sink;

/// Name the merge buffer is registered under by [`Catalog::with_builtin`].
pub const MERGE: &str = "merge";

/// A periodic aggregator as seen by the host.
pub trait Aggregator: Send {
    /// Accepts one incoming metric.
    fn add(&mut self, metric: Metric);

    /// Hands every finished record to `sink`. Called once per host tick.
    fn push(&mut self, sink: &mut dyn Sink);

    /// Advances to the next window. Called after a successful push.
    fn reset(&mut self);

    /// One-line description of the aggregator.
    fn description(&self) -> &'static str;

    /// Example configuration for the aggregator.
    fn sample_config(&self) -> &'static str;
}

impl<C: Clock + 'static> Aggregator for MergeBuffer<C> {
    fn add(&mut self, metric: Metric) {
        self.accumulate(metric);
    }

    fn push(&mut self, sink: &mut dyn Sink) {
        self.flush_now(sink);
    }

    fn reset(&mut self) {
        self.commit();
    }

    fn description(&self) -> &'static str {
        "Merge metrics into multifield metrics by series key"
    }

    fn sample_config(&self) -> &'static str {
        SAMPLE_CONFIG
    }
}

/// Builds an aggregator from its configuration.
pub type Factory = fn(&MergeConfig) -> Box<dyn Aggregator>;

/// Builds a [`MergeBuffer`] on the system clock.
pub fn merge_factory(config: &MergeConfig) -> Box<dyn Aggregator> {
    Box::new(MergeBuffer::new(config.clone()))
}

/// Name-indexed collection of aggregator factories.
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    factories: BTreeMap<String, Factory>,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog with the merge aggregator registered as [`MERGE`].
    pub fn with_builtin() -> Self {
        let mut catalog = Self::new();
        catalog.factories.insert(MERGE.to_string(), merge_factory);
        catalog
    }

    /// Registers a factory under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::DuplicateAggregator`] if the name is taken.
    pub fn register(&mut self, name: &str, factory: Factory) -> Result<()> {
        if self.factories.contains_key(name) {
            return Err(CatalogError::DuplicateAggregator {
                name: name.to_string(),
            }
            .into());
        }
        self.factories.insert(name.to_string(), factory);
        Ok(())
    }

    /// Builds the aggregator registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::UnknownAggregator`] if nothing is registered
    /// under that name.
    pub fn create(&self, name: &str, config: &MergeConfig) -> Result<Box<dyn Aggregator>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| CatalogError::UnknownAggregator {
                name: name.to_string(),
            })?;
        tracing::debug!(aggregator = name, hold_time = ?config.hold_time, "creating aggregator");
        Ok(factory(config))
    }

    /// Returns the registered names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}
