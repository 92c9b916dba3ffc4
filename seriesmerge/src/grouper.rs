//! Grouping of partial records by series identity.
//!
//! Many collectors produce one field at a time for the same logical data
//! point. [`SeriesGrouper`] folds those partial records into one multi-field
//! record per (name, tags, timestamp) identity:
//!
//! ```text
//! cpu,cpu=cpu0 time_idle=42i 0
//! cpu,cpu=cpu0 time_guest=42i 0
//! ---------------------------------------------------
//! cpu,cpu=cpu0 time_idle=42i,time_guest=42i 0
//! ```
//!
//! Records are reported in the order their identity was first seen, no
//! matter how many later merges touch them.
//!
//! # Example
//!
//! ```rust
//! use seriesmerge::grouper::SeriesGrouper;
//! use seriesmerge::metric::Metric;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut grouper = SeriesGrouper::new();
//! grouper.add_record(Metric::new("cpu", [("cpu", "cpu0")], 0).with_field("time_idle", 42)?);
//! grouper.add_record(Metric::new("cpu", [("cpu", "cpu0")], 0).with_field("time_guest", 42)?);
//!
//! assert_eq!(grouper.len(), 1);
//! assert_eq!(grouper.emit()[0].fields().len(), 2);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use crate::error::Result;
use crate::metric::{IntoFieldValue, Metric};
use crate::series::{FnvBuildHasher, SeriesKey};

/// A record the grouper can hold.
///
/// The grouper only needs the inner [`Metric`] for identity and field
/// merging; wrapper types carry extra per-record state alongside it.
pub trait GroupedRecord {
    /// Returns the metric carried by this record.
    fn metric(&self) -> &Metric;

    /// Returns the metric carried by this record, mutably.
    fn metric_mut(&mut self) -> &mut Metric;

    /// Unwraps the record into its metric.
    fn into_metric(self) -> Metric;
}

impl GroupedRecord for Metric {
    fn metric(&self) -> &Metric {
        self
    }

    fn metric_mut(&mut self) -> &mut Metric {
        self
    }

    fn into_metric(self) -> Metric {
        self
    }
}

/// One generation of grouped records.
///
/// Owns every record it holds. The index maps each identity to the record's
/// position in `records`, which is the first-insertion order; each identity
/// appears exactly once.
#[derive(Debug, Clone)]
pub struct SeriesGrouper<T = Metric> {
    index: HashMap<SeriesKey, usize, FnvBuildHasher>,
    records: Vec<T>,
}

impl<T> Default for SeriesGrouper<T> {
    fn default() -> Self {
        Self {
            index: HashMap::default(),
            records: Vec::new(),
        }
    }
}

impl<T: GroupedRecord> SeriesGrouper<T> {
    /// Creates an empty grouper.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record, merging it into an existing record with the same identity.
    ///
    /// If the identity is new, the grouper takes ownership of `record` and
    /// appends it. Otherwise every field of `record` is copied into the held
    /// record (last write wins) and `record` is dropped, including any
    /// wrapper state it carried.
    pub fn add_record(&mut self, record: T) {
        let key = SeriesKey::of(record.metric());
        match self.index.entry(key) {
            Entry::Occupied(entry) => {
                tracing::trace!(series = entry.key().name(), "merging fields into held record");
                self.records[*entry.get()]
                    .metric_mut()
                    .merge_fields(record.into_metric());
            }
            Entry::Vacant(entry) => {
                tracing::trace!(series = entry.key().name(), "inserting new series");
                entry.insert(self.records.len());
                self.records.push(record);
            }
        }
    }

    /// Returns the held record with the given identity.
    pub fn get(&self, name: &str, tags: &BTreeMap<String, String>, timestamp: i64) -> Option<&T> {
        let key = SeriesKey::new(name, tags, timestamp);
        self.index.get(&key).map(|&i| &self.records[i])
    }

    /// Returns the held records in first-insertion order.
    ///
    /// This is a view; the grouper is unchanged.
    pub fn emit(&self) -> &[T] {
        &self.records
    }

    /// Returns the number of distinct identities held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no records are held.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consumes the grouper, returning its records in first-insertion order.
    pub fn into_records(self) -> Vec<T> {
        self.records
    }
}

impl SeriesGrouper<Metric> {
    /// Adds a single field to the series identified by `name`, `tags` and `timestamp`.
    ///
    /// Creates a one-field record when the identity is new, otherwise adds or
    /// overwrites the field on the held record. Uses the same identity
    /// encoding as [`add_record`](Self::add_record), so both paths merge.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::UnsupportedValueType`](crate::error::FieldError::UnsupportedValueType)
    /// if `value` cannot be represented. The grouper is not modified in that case.
    pub fn add_field<V: IntoFieldValue>(
        &mut self,
        name: &str,
        tags: &BTreeMap<String, String>,
        timestamp: i64,
        key: &str,
        value: V,
    ) -> Result<()> {
        let value = value.into_field_value(key)?;

        match self.index.entry(SeriesKey::new(name, tags, timestamp)) {
            Entry::Occupied(entry) => {
                self.records[*entry.get()].add_field(key, value);
            }
            Entry::Vacant(entry) => {
                let mut metric = Metric::new(name, tags.clone(), timestamp);
                metric.add_field(key, value);
                entry.insert(self.records.len());
                self.records.push(metric);
            }
        }
        Ok(())
    }
}
