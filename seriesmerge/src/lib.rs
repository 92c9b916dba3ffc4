//! # seriesmerge
//!
//! Series grouping and hold-time merging for telemetry pipelines.
//!
//! Many collectors emit one field at a time for the same logical data point,
//! while downstream systems expect that point as one wide record. seriesmerge
//! folds partial records sharing a series identity (measurement name, tag
//! set, timestamp) into one multi-field record, and holds records across
//! flush cycles so fields that arrive a little late still merge.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - Deterministic 64-bit FNV-1a series fingerprints
//! - Structural identity keys, so distinct series never collide
//! - Emission in first-seen order, independent of merge order
//! - Two-generation flush/commit: `flush` is read-only and repeatable,
//!   `commit` is the only step that advances the window
//! - Wall-clock hold time, independent of metric timestamps
//! - No background threads, no locks, no I/O
//!
//! ## Quick Start
//!
//! ```rust
//! use seriesmerge::{CollectingSink, MergeBuffer, MergeConfig, Metric};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut buffer = MergeBuffer::new(MergeConfig::default());
//!
//! buffer.accumulate(Metric::new("cpu", [("cpu", "cpu0")], 0).with_field("time_idle", 42)?);
//! buffer.accumulate(Metric::new("cpu", [("cpu", "cpu0")], 0).with_field("time_guest", 42)?);
//!
//! // Once per host tick:
//! let mut sink = CollectingSink::new();
//! buffer.flush_now(&mut sink);
//! buffer.commit();
//!
//! assert_eq!(
//!     sink.metrics()[0].to_string(),
//!     "cpu,cpu=cpu0 time_idle=42i,time_guest=42i 0"
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Metric`]: Name, tags, typed fields and a nanosecond timestamp
//! - [`SeriesGrouper`]: One generation of records grouped by identity
//! - [`MergeBuffer`]: Hold-time gated accumulate/flush/commit buffer
//! - [`Sink`]: Receiver of emitted records
//!
//! ## Modules
//!
//! - [`metric`]: Metric records and field values
//! - [`series`]: Series identity and fingerprinting
//! - [`grouper`]: Grouping by identity
//! - [`merge`]: The windowed merge buffer
//! - [`clock`]: Wall-clock sources
//! - [`sink`]: The emission boundary
//! - [`config`]: Buffer configuration
//! - [`aggregator`]: Host-facing aggregator contract and catalog
//! - [`error`]: Error types

pub mod aggregator;
pub mod clock;
pub mod config;
pub mod error;
pub mod grouper;
pub mod merge;
pub mod metric;
pub mod series;
pub mod sink;

// Re-export primary API types at crate root for convenience.
pub use aggregator::{Aggregator, Catalog};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MergeConfig;
pub use error::{MergeError, Result};
pub use grouper::SeriesGrouper;
pub use merge::{FlushStats, MergeBuffer, Stamped};
pub use metric::{FieldValue, Metric};
pub use series::{SeriesKey, fingerprint};
pub use sink::{CollectingSink, Sink};
