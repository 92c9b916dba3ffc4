//! CLI for the seriesmerge merge buffer.
//!
//! Hosts a [`MergeBuffer`] over a stream of JSON-lines metrics, and provides
//! commands for computing series fingerprints and benchmarking the merge path.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use clap::{Parser, Subcommand, ValueEnum};
use seriesmerge::config::parse_duration;
use seriesmerge::{CollectingSink, MergeBuffer, MergeConfig, Metric, fingerprint};
use tracing_subscriber::EnvFilter;

/// seriesmerge: merge partial metric records into multi-field records.
#[derive(Parser)]
#[command(name = "seriesmerge", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Merge a stream of JSON-lines metrics and print the merged records.
    Merge {
        /// Input file. Reads stdin when omitted.
        #[arg(long)]
        input: Option<PathBuf>,

        /// JSON configuration file (e.g. {"hold_time": "250ms"}).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Minimum wall-clock time a record is held (e.g. "0s", "250ms").
        /// Overrides the configuration file.
        #[arg(long, value_parser = parse_duration_arg)]
        hold_time: Option<Duration>,

        /// Whether to drop the unmerged input records. Overrides the
        /// configuration file.
        #[arg(long)]
        drop_original: Option<bool>,

        /// How often to flush and commit the buffer. Ticks also fire while
        /// the input is idle.
        #[arg(long, default_value = "10s", value_parser = parse_duration_arg)]
        flush_interval: Duration,

        /// Output format.
        #[arg(long, default_value = "line")]
        format: OutputFormat,
    },

    /// Print the series fingerprint of an identity.
    Fingerprint {
        /// Measurement name.
        name: String,

        /// Tag as key=value. May be repeated.
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,

        /// Timestamp in nanoseconds since the Unix epoch.
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        timestamp: i64,
    },

    /// Run an accumulate/flush microbenchmark.
    Bench {
        /// Number of distinct series per tick.
        #[arg(long, default_value = "100")]
        series: usize,

        /// Number of single-field records per series.
        #[arg(long, default_value = "8")]
        fields: usize,

        /// Number of ticks (timestamps) to merge.
        #[arg(long, default_value = "1000")]
        points: usize,
    },
}

/// Output format for merged records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Line protocol, one record per line.
    Line,
    /// One JSON object per line.
    Json,
}

/// Counters reported at the end of a merge run.
#[derive(Debug, Default, PartialEq, Eq)]
struct RunStats {
    read: usize,
    skipped: usize,
    emitted: usize,
    ticks: usize,
    drained: usize,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Merge {
            input,
            config,
            hold_time,
            drop_original,
            flush_interval,
            format,
        } => cmd_merge(
            input.as_deref(),
            config.as_deref(),
            hold_time,
            drop_original,
            flush_interval,
            format,
        ),
        Commands::Fingerprint {
            name,
            tags,
            timestamp,
        } => {
            cmd_fingerprint(&name, tags, timestamp);
            Ok(())
        }
        Commands::Bench {
            series,
            fields,
            points,
        } => cmd_bench(series, fields, points),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Implements `seriesmerge merge`.
fn cmd_merge(
    input: Option<&Path>,
    config_path: Option<&Path>,
    hold_time: Option<Duration>,
    drop_original: Option<bool>,
    flush_interval: Duration,
    format: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(config_path, hold_time, drop_original)?;
    tracing::info!(
        hold_time = %humantime::format_duration(config.hold_time),
        flush_interval = %humantime::format_duration(flush_interval),
        drop_original = config.drop_original,
        "starting merge"
    );

    let lines = match input {
        Some(path) => {
            let file = File::open(path)?;
            spawn_reader(move || BufReader::new(file))
        }
        None => spawn_reader(|| io::stdin().lock()),
    };
    let mut writer = BufWriter::new(io::stdout().lock());

    let stats = run_merge(&lines, &mut writer, config, flush_interval, format)?;
    writer.flush()?;

    tracing::info!(
        read = stats.read,
        skipped = stats.skipped,
        emitted = stats.emitted,
        ticks = stats.ticks,
        "merge finished"
    );
    Ok(())
}

/// Builds the effective configuration: file first, then flag overrides.
fn load_config(
    path: Option<&Path>,
    hold_time: Option<Duration>,
    drop_original: Option<bool>,
) -> Result<MergeConfig, Box<dyn std::error::Error>> {
    let mut config = match path {
        Some(path) => MergeConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => MergeConfig::default(),
    };
    if let Some(hold_time) = hold_time {
        config.hold_time = hold_time;
    }
    if let Some(drop_original) = drop_original {
        config.drop_original = drop_original;
    }
    Ok(config)
}

/// Reads lines on a background thread so the merge loop can tick while the
/// input is idle. The channel closes at end of input or after a read error.
fn spawn_reader<R, F>(open: F) -> Receiver<io::Result<String>>
where
    R: BufRead,
    F: FnOnce() -> R + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in open().lines() {
            let failed = line.is_err();
            if tx.send(line).is_err() || failed {
                break;
            }
        }
    });
    rx
}

/// Runs the accumulate/flush/commit loop over JSON-lines input.
///
/// The buffer is flushed and committed every `flush_interval`, whether or
/// not input is arriving. At end of input everything still held is drained
/// by flushing as if the hold time had already passed.
fn run_merge<W: Write>(
    lines: &Receiver<io::Result<String>>,
    writer: &mut W,
    config: MergeConfig,
    flush_interval: Duration,
    format: OutputFormat,
) -> Result<RunStats, Box<dyn std::error::Error>> {
    let drop_original = config.drop_original;
    let hold_time = config.hold_time;
    let mut buffer = MergeBuffer::new(config);
    let mut sink = CollectingSink::new();
    let mut stats = RunStats::default();
    let mut line_number = 0;
    let mut next_tick = Instant::now().checked_add(flush_interval);

    loop {
        let received = match next_tick {
            Some(deadline) => {
                lines.recv_timeout(deadline.saturating_duration_since(Instant::now()))
            }
            None => lines.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(line) => {
                let line = line?;
                line_number += 1;
                if !line.trim().is_empty() {
                    match serde_json::from_str::<Metric>(&line) {
                        Ok(metric) => {
                            stats.read += 1;
                            if !drop_original {
                                write_metric(writer, &metric, format)?;
                            }
                            buffer.accumulate(metric);
                        }
                        Err(e) => {
                            stats.skipped += 1;
                            tracing::warn!(line = line_number, error = %e, "skipping malformed record");
                        }
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if next_tick.is_some_and(|deadline| Instant::now() >= deadline) {
            buffer.flush_now(&mut sink);
            buffer.commit();
            stats.emitted += write_metrics(writer, sink.take(), format)?;
            stats.ticks += 1;
            writer.flush()?;
            next_tick = Instant::now().checked_add(flush_interval);
        }
    }

    let now = SystemTime::now();
    let drain_at = now.checked_add(hold_time).unwrap_or_else(|| {
        tracing::warn!("hold time too large to drain, flushing at current time");
        now
    });
    let drained = buffer.flush(&mut sink, drain_at);
    buffer.commit();
    stats.drained = write_metrics(writer, sink.take(), format)?;
    stats.emitted += stats.drained;
    tracing::debug!(emitted = drained.emitted, held = drained.held, "drained buffer");

    Ok(stats)
}

/// Writes a batch of records and returns how many were written.
fn write_metrics<W: Write>(
    writer: &mut W,
    metrics: Vec<Metric>,
    format: OutputFormat,
) -> io::Result<usize> {
    let count = metrics.len();
    for metric in &metrics {
        write_metric(writer, metric, format)?;
    }
    Ok(count)
}

fn write_metric<W: Write>(writer: &mut W, metric: &Metric, format: OutputFormat) -> io::Result<()> {
    match format {
        OutputFormat::Line => writeln!(writer, "{metric}"),
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, metric)?;
            writeln!(writer)
        }
    }
}

/// Implements `seriesmerge fingerprint <name>`.
fn cmd_fingerprint(name: &str, tags: Vec<(String, String)>, timestamp: i64) {
    let tags: BTreeMap<String, String> = tags.into_iter().collect();
    println!("{:016x}", fingerprint(name, &tags, timestamp));
}

/// Implements `seriesmerge bench`.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)] // Benchmark stats are fine with f64 precision
fn cmd_bench(series: usize, fields: usize, points: usize) -> Result<(), Box<dyn std::error::Error>> {
    println!("seriesmerge accumulate/flush benchmark");
    println!("  Series: {series}");
    println!("  Fields: {fields}");
    println!("  Points: {points}");
    println!();

    let series_tags: Vec<[(String, String); 2]> = (0..series)
        .map(|s| {
            [
                ("cpu".to_string(), format!("cpu{s}")),
                ("host".to_string(), "bench".to_string()),
            ]
        })
        .collect();
    let field_keys: Vec<String> = (0..fields).map(|f| format!("field_{f}")).collect();

    let mut buffer = MergeBuffer::new(MergeConfig::default());
    let mut sink = CollectingSink::new();
    let mut emitted = 0;
    let base_time = 1_700_000_000_000_000_000i64;

    let start = Instant::now();

    for point in 0..points {
        let ts = base_time + point as i64 * 1_000_000_000;
        for tags in &series_tags {
            for (f, key) in field_keys.iter().enumerate() {
                let metric = Metric::new("cpu", tags.clone(), ts).with_field(key.as_str(), f as i64)?;
                buffer.accumulate(metric);
            }
        }
        buffer.flush_now(&mut sink);
        buffer.commit();
        emitted += sink.take().len();
    }

    let elapsed = start.elapsed();
    let total = points * series * fields;
    let ns_per_record = elapsed.as_nanos() as f64 / total.max(1) as f64;
    let records_per_sec = total as f64 / elapsed.as_secs_f64();

    println!("Results:");
    println!("  Records accumulated: {total}");
    println!("  Records emitted: {emitted}");
    println!("  Elapsed: {elapsed:.3?}");
    println!("  Avg latency: {ns_per_record:.1} ns/record");
    println!("  Throughput: {records_per_sec:.0} records/sec");
    println!();

    Ok(())
}

/// Parses a humanized duration flag value.
fn parse_duration_arg(s: &str) -> Result<Duration, String> {
    parse_duration(s).map_err(|e| e.to_string())
}

/// Parses a `key=value` tag flag value.
fn parse_tag(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid tag '{s}', expected key=value")),
    }
}
