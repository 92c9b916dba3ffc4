//! Windowed merge buffer.
//!
//! The buffer groups incoming metrics by series identity and holds each
//! grouped record until it has been quiet for `hold_time` of wall-clock
//! time, so fields that straddle a flush boundary still end up in one
//! record.
//!
//! # Flush / Commit Protocol
//!
//! ```text
//!                accumulate
//!                    │
//!                    ▼
//!   ┌──────────── current ────────────┐
//!   │   flush(sink, now) reads only   │
//!   ▼                                 ▼
//! stamp <= now - hold_time        otherwise
//!   │                                 │
//!   ▼                                 ▼
//! sink.deliver(...)              staged generation
//!                                     │
//!                     commit: current = staged
//! ```
//!
//! `flush` never mutates `current`, so calling it again before `commit`
//! re-emits the same ready set and re-stages the same pending set. Only
//! `commit` advances the window.
//!
//! # Example
//!
//! ```rust
//! use std::time::{Duration, SystemTime};
//! use seriesmerge::clock::{Clock, ManualClock};
//! use seriesmerge::config::MergeConfig;
//! use seriesmerge::merge::MergeBuffer;
//! use seriesmerge::metric::Metric;
//! use seriesmerge::sink::CollectingSink;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let clock = ManualClock::new(SystemTime::UNIX_EPOCH);
//! let mut buffer = MergeBuffer::with_clock(
//!     MergeConfig::with_hold_time(Duration::from_millis(10)),
//!     clock.clone(),
//! );
//!
//! buffer.accumulate(Metric::new("cpu", [("cpu", "cpu0")], 0).with_field("time_idle", 42)?);
//!
//! let mut sink = CollectingSink::new();
//! buffer.flush(&mut sink, clock.now());
//! buffer.commit();
//! assert!(sink.is_empty());
//!
//! clock.advance(Duration::from_millis(10));
//! buffer.flush(&mut sink, clock.now());
//! buffer.commit();
//! assert_eq!(sink.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::time::{Duration, SystemTime};

use crate::clock::{Clock, SystemClock};
use crate::config::MergeConfig;
use crate::grouper::{GroupedRecord, SeriesGrouper};
use crate::metric::Metric;
use crate::sink::Sink;

/// Precision requested from the sink on every flush.
pub const FLUSH_PRECISION: Duration = Duration::from_nanos(1);

/// A metric stamped with the wall-clock time it first entered a generation.
///
/// Merging more fields into a held record keeps the original stamp, and a
/// record carried into the next generation keeps it too.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped {
    /// Wall-clock arrival time.
    pub wall_time: SystemTime,
    /// The grouped metric.
    pub metric: Metric,
}

impl GroupedRecord for Stamped {
    fn metric(&self) -> &Metric {
        &self.metric
    }

    fn metric_mut(&mut self) -> &mut Metric {
        &mut self.metric
    }

    fn into_metric(self) -> Metric {
        self.metric
    }
}

/// Outcome of one flush evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushStats {
    /// Records delivered to the sink.
    pub emitted: usize,
    /// Records staged for the next generation.
    pub held: usize,
}

/// Groups metrics by series and emits them once they have aged past the hold time.
///
/// The buffer expects its host to serialize calls: `accumulate` at any
/// time, then `flush` once per tick, then `commit` after a successful
/// flush. It performs no locking of its own.
#[derive(Debug)]
pub struct MergeBuffer<C = SystemClock> {
    hold_time: Duration,
    clock: C,
    current: SeriesGrouper<Stamped>,
    staged: Option<SeriesGrouper<Stamped>>,
    flushed: bool,
}

impl MergeBuffer<SystemClock> {
    /// Creates an empty buffer reading the system wall clock.
    pub fn new(config: MergeConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> MergeBuffer<C> {
    /// Creates an empty buffer reading the given clock.
    pub fn with_clock(config: MergeConfig, clock: C) -> Self {
        Self {
            hold_time: config.hold_time,
            clock,
            current: SeriesGrouper::new(),
            staged: None,
            flushed: false,
        }
    }

    /// Stamps `metric` with the current wall-clock time and groups it.
    ///
    /// Only the current generation is touched; a staged candidate from an
    /// earlier flush is unaffected.
    pub fn accumulate(&mut self, metric: Metric) {
        let wall_time = self.clock.now();
        self.current.add_record(Stamped { wall_time, metric });
    }

    /// Delivers every record that has been held for at least `hold_time`.
    ///
    /// A record stamped at `T` is ready when `now >= T + hold_time`. Ready
    /// records go to `sink` in first-insertion order; the rest are copied
    /// into a fresh staged generation which replaces any earlier one. The
    /// current generation is left untouched, so this can be repeated before
    /// [`commit`](Self::commit).
    pub fn flush<S: Sink + ?Sized>(&mut self, sink: &mut S, now: SystemTime) -> FlushStats {
        sink.set_precision(FLUSH_PRECISION);

        let cutoff = now.checked_sub(self.hold_time);
        let mut staged = SeriesGrouper::new();
        let mut stats = FlushStats::default();

        for record in self.current.emit() {
            if cutoff.is_some_and(|cutoff| record.wall_time <= cutoff) {
                sink.deliver(record.metric.clone());
                stats.emitted += 1;
            } else {
                staged.add_record(record.clone());
                stats.held += 1;
            }
        }

        tracing::debug!(
            emitted = stats.emitted,
            held = stats.held,
            hold_time = ?self.hold_time,
            "flushed merge buffer"
        );

        self.staged = Some(staged);
        self.flushed = true;
        stats
    }

    /// Replaces the current generation with the last staged one.
    ///
    /// Records accumulated after that flush are discarded with the rest of
    /// the old generation, so hosts commit straight after flushing. A commit
    /// with no flush since the previous commit keeps the current generation
    /// as it is. A buffer that has never been flushed is emptied.
    pub fn commit(&mut self) {
        let Some(next) = self.staged.take() else {
            if !self.flushed {
                self.current = SeriesGrouper::new();
            }
            tracing::debug!(
                retained = self.current.len(),
                "commit without a new flush"
            );
            return;
        };

        tracing::debug!(
            dropped = self.current.len().saturating_sub(next.len()),
            retained = next.len(),
            "committed merge buffer"
        );
        self.current = next;
    }

    /// Flushes at the clock's current time.
    pub fn flush_now<S: Sink + ?Sized>(&mut self, sink: &mut S) -> FlushStats {
        let now = self.clock.now();
        self.flush(sink, now)
    }

    /// Returns the configured hold time.
    pub fn hold_time(&self) -> Duration {
        self.hold_time
    }

    /// Returns the clock the buffer stamps records with.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Returns the records of the current generation in first-insertion order.
    pub fn pending(&self) -> &[Stamped] {
        self.current.emit()
    }

    /// Returns the number of records in the current generation.
    pub fn pending_len(&self) -> usize {
        self.current.len()
    }

    /// Returns the number of records staged by the last flush, if any.
    pub fn staged_len(&self) -> Option<usize> {
        self.staged.as_ref().map(SeriesGrouper::len)
    }

    /// Returns `true` if the current generation holds no records.
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::metric::FieldValue;
    use crate::sink::CollectingSink;

    fn epoch_plus(ms: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(ms)
    }

    fn buffer(hold_ms: u64) -> (MergeBuffer<ManualClock>, ManualClock) {
        let clock = ManualClock::new(epoch_plus(1_000));
        let buffer = MergeBuffer::with_clock(
            MergeConfig::with_hold_time(Duration::from_millis(hold_ms)),
            clock.clone(),
        );
        (buffer, clock)
    }

    fn cpu(ts: i64, field: &str, value: i64) -> Metric {
        Metric::new("cpu", [("cpu", "cpu0")], ts)
            .with_field(field, value)
            .unwrap()
    }

    #[test]
    fn test_new_buffer_is_empty() {
        let (buffer, _) = buffer(0);
        assert!(buffer.is_empty());
        assert_eq!(buffer.pending_len(), 0);
        assert_eq!(buffer.staged_len(), None);
        assert_eq!(buffer.hold_time(), Duration::ZERO);
    }

    #[test]
    fn test_zero_hold_time_emits_merged_record() {
        let (mut buffer, clock) = buffer(0);
        buffer.accumulate(cpu(0, "time_idle", 42));
        buffer.accumulate(cpu(0, "time_guest", 42));

        let mut sink = CollectingSink::new();
        let stats = buffer.flush(&mut sink, clock.now());

        assert_eq!(stats, FlushStats { emitted: 1, held: 0 });
        let expected = cpu(0, "time_idle", 42).with_field("time_guest", 42).unwrap();
        assert_eq!(sink.metrics(), &[expected]);
    }

    #[test]
    fn test_flush_requests_nanosecond_precision() {
        let (mut buffer, clock) = buffer(0);
        buffer.accumulate(cpu(1, "time_idle", 42));

        let mut sink = CollectingSink::with_precision(Duration::from_secs(1));
        buffer.flush(&mut sink, clock.now());

        assert_eq!(sink.precision(), FLUSH_PRECISION);
        assert_eq!(sink.metrics()[0].timestamp(), 1);
    }

    #[test]
    fn test_boundary_is_ready_at_exact_hold_time() {
        let (mut buffer, clock) = buffer(10);
        buffer.accumulate(cpu(0, "a", 1));

        let mut sink = CollectingSink::new();
        let stats = buffer.flush(&mut sink, epoch_plus(1_009));
        assert_eq!(stats, FlushStats { emitted: 0, held: 1 });

        let stats = buffer.flush(&mut sink, clock.now() + Duration::from_millis(10));
        assert_eq!(stats, FlushStats { emitted: 1, held: 0 });
    }

    #[test]
    fn test_flush_is_idempotent_before_commit() {
        let (mut buffer, clock) = buffer(10);
        buffer.accumulate(cpu(0, "a", 1));
        clock.advance(Duration::from_millis(5));
        buffer.accumulate(cpu(1, "a", 1));

        let now = epoch_plus(1_012);
        let mut first = CollectingSink::new();
        let mut second = CollectingSink::new();

        let a = buffer.flush(&mut first, now);
        let b = buffer.flush(&mut second, now);

        assert_eq!(a, b);
        assert_eq!(a, FlushStats { emitted: 1, held: 1 });
        assert_eq!(first.metrics(), second.metrics());
        assert_eq!(buffer.pending_len(), 2);
        assert_eq!(buffer.staged_len(), Some(1));
    }

    #[test]
    fn test_commit_keeps_only_staged_records() {
        let (mut buffer, clock) = buffer(10);
        buffer.accumulate(cpu(0, "a", 1));
        clock.advance(Duration::from_millis(10));
        buffer.accumulate(cpu(1, "a", 1));

        let mut sink = CollectingSink::new();
        buffer.flush(&mut sink, clock.now());
        buffer.commit();

        assert_eq!(sink.len(), 1);
        assert_eq!(buffer.pending_len(), 1);
        assert_eq!(buffer.pending()[0].metric.timestamp(), 1);
        assert_eq!(buffer.staged_len(), None);

        // The emitted record is gone; flushing again only sees the held one.
        let mut again = CollectingSink::new();
        let stats = buffer.flush(&mut again, clock.now() + Duration::from_millis(10));
        assert_eq!(stats, FlushStats { emitted: 1, held: 0 });
        assert_eq!(again.metrics()[0].timestamp(), 1);
    }

    #[test]
    fn test_commit_without_flush_empties_buffer() {
        let (mut buffer, _) = buffer(0);
        buffer.accumulate(cpu(0, "a", 1));
        buffer.commit();
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_repeated_commit_keeps_current_generation() {
        let (mut buffer, clock) = buffer(1_000);
        buffer.accumulate(cpu(0, "a", 1));

        let mut sink = CollectingSink::new();
        buffer.flush_now(&mut sink);
        buffer.commit();
        assert_eq!(buffer.pending_len(), 1);

        buffer.accumulate(cpu(1, "a", 1));
        buffer.commit();

        assert!(sink.is_empty());
        assert_eq!(buffer.pending_len(), 2);

        clock.advance(Duration::from_secs(1));
        let stats = buffer.flush_now(&mut sink);
        assert_eq!(stats, FlushStats { emitted: 2, held: 0 });
    }

    #[test]
    fn test_staged_record_keeps_wall_stamp() {
        let (mut buffer, clock) = buffer(10);
        buffer.accumulate(cpu(0, "a", 1));
        let stamp = clock.now();

        let mut sink = CollectingSink::new();
        clock.advance(Duration::from_millis(3));
        buffer.flush_now(&mut sink);
        buffer.commit();

        assert_eq!(buffer.pending()[0].wall_time, stamp);
    }

    #[test]
    fn test_merge_keeps_first_stamp() {
        let (mut buffer, clock) = buffer(10);
        buffer.accumulate(cpu(0, "a", 1));
        clock.advance(Duration::from_millis(10));
        buffer.accumulate(cpu(0, "b", 2));

        let mut sink = CollectingSink::new();
        let stats = buffer.flush_now(&mut sink);

        assert_eq!(stats.emitted, 1);
        assert_eq!(sink.metrics()[0].field("b"), Some(&FieldValue::Integer(2)));
    }

    #[test]
    fn test_accumulate_after_flush_is_lost_without_reflush() {
        let (mut buffer, clock) = buffer(0);
        buffer.accumulate(cpu(0, "a", 1));

        let mut sink = CollectingSink::new();
        buffer.flush(&mut sink, clock.now());
        buffer.accumulate(cpu(1, "a", 1));
        buffer.commit();

        // The staged generation was computed before the second record arrived.
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_cutoff_underflow_holds_everything() {
        let clock = ManualClock::new(SystemTime::UNIX_EPOCH);
        let mut buffer =
            MergeBuffer::with_clock(MergeConfig::with_hold_time(Duration::MAX), clock.clone());
        buffer.accumulate(cpu(0, "a", 1));

        let mut sink = CollectingSink::new();
        let stats = buffer.flush_now(&mut sink);
        assert_eq!(stats, FlushStats { emitted: 0, held: 1 });
    }
}
