//! Microbenchmarks for the accumulate and flush paths.
//!
//! Run with: `cargo bench -p seriesmerge`

#![allow(missing_docs, clippy::cast_possible_wrap)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use seriesmerge::clock::ManualClock;
use seriesmerge::config::MergeConfig;
use seriesmerge::grouper::SeriesGrouper;
use seriesmerge::merge::MergeBuffer;
use seriesmerge::metric::Metric;
use seriesmerge::series::fingerprint;
use seriesmerge::sink::CollectingSink;
use std::collections::BTreeMap;
use std::time::{Duration, SystemTime};

/// Builds one single-field record per (series, field) pair.
fn partial_records(series: usize, fields: usize, ts: i64) -> Vec<Metric> {
    let mut records = Vec::with_capacity(series * fields);
    for s in 0..series {
        for f in 0..fields {
            let metric = Metric::new(
                "cpu",
                [("cpu", format!("cpu{s}")), ("host", "web1".to_string())],
                ts,
            )
            .with_field(format!("field_{f}"), f as i64)
            .unwrap();
            records.push(metric);
        }
    }
    records
}

fn bench_fingerprint(c: &mut Criterion) {
    let tags: BTreeMap<String, String> = [
        ("cpu", "cpu0"),
        ("host", "web1.example.com"),
        ("region", "eu-west-1"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();

    c.bench_function("fingerprint/three_tags", |b| {
        b.iter(|| fingerprint(black_box("cpu"), black_box(&tags), black_box(1_700_000_000)));
    });
}

fn bench_grouper(c: &mut Criterion) {
    let mut group = c.benchmark_group("grouper/add_record");

    for series in [1, 10, 100] {
        let records = partial_records(series, 8, 0);
        group.bench_with_input(BenchmarkId::from_parameter(series), &records, |b, records| {
            b.iter(|| {
                let mut grouper: SeriesGrouper = SeriesGrouper::new();
                for record in records {
                    grouper.add_record(black_box(record.clone()));
                }
                grouper
            });
        });
    }

    group.finish();
}

fn bench_flush_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge/flush_commit");

    for series in [10, 100, 1000] {
        let records = partial_records(series, 4, 0);
        group.bench_with_input(BenchmarkId::from_parameter(series), &records, |b, records| {
            let clock = ManualClock::new(SystemTime::UNIX_EPOCH + Duration::from_secs(1));
            b.iter(|| {
                let mut buffer = MergeBuffer::with_clock(MergeConfig::default(), clock.clone());
                for record in records {
                    buffer.accumulate(record.clone());
                }
                let mut sink = CollectingSink::new();
                buffer.flush_now(&mut sink);
                buffer.commit();
                black_box(sink.len())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fingerprint, bench_grouper, bench_flush_commit);
criterion_main!(benches);
