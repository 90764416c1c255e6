//! Sleep Replay
//!
//! Replays a newline-delimited JSON recording of canonical samples through
//! the sleep engine and prints every emitted row (and confirmed epoch) as
//! newline-delimited JSON on stdout. Logs go to stderr.
//!
//! Input lines are either a [`Sample`] (`{"t": .., "channel": "power", ..}`)
//! or a layout announcement `{"labels": ["AF3/theta", ...]}`.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sleep_sensing::{ConfirmedEpoch, EngineConfig, Row, Sample, SleepEngine};

#[derive(Debug, Parser)]
#[command(name = "sleep-replay", version, about = "Replay recorded samples through the sleep engine")]
struct Cli {
    /// NDJSON recording; reads stdin when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Engine configuration (JSON). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comma-separated power channel labels, e.g. `AF3/theta,AF3/alpha`.
    #[arg(long, value_delimiter = ',')]
    labels: Vec<String>,

    /// Also print confirmed epochs after each row.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    confirmed: bool,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Output<'a> {
    Row(&'a Row),
    Confirmed(&'a ConfirmedEpoch),
}

#[derive(Debug, Default)]
struct ReplayStats {
    lines: usize,
    malformed: usize,
    rows: usize,
    poor_quality: usize,
    confirmed: usize,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)))
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(io::stderr))
        .init();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_json(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let mut engine = SleepEngine::new(config)?;
    if !cli.labels.is_empty() {
        engine.configure(cli.labels.as_slice());
    }

    let reader: Box<dyn BufRead> = match &cli.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let mut out = BufWriter::new(io::stdout().lock());

    let stats = replay(&mut engine, reader, &mut out, cli.confirmed)?;
    out.flush()?;

    info!(
        lines = stats.lines,
        malformed = stats.malformed,
        rows = stats.rows,
        poor_quality = stats.poor_quality,
        confirmed = stats.confirmed,
        "replay finished"
    );
    Ok(())
}

fn replay<R: BufRead, W: Write>(
    engine: &mut SleepEngine,
    reader: R,
    out: &mut W,
    emit_confirmed: bool,
) -> anyhow::Result<ReplayStats> {
    let mut stats = ReplayStats::default();

    for (idx, line) in reader.lines().enumerate() {
        let line = line.context("reading input")?;
        if line.trim().is_empty() {
            continue;
        }
        stats.lines += 1;

        let value: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(err) => {
                warn!(line = idx + 1, error = %err, "malformed line skipped");
                stats.malformed += 1;
                continue;
            }
        };

        if let Some(labels) = value.get("labels").and_then(Value::as_array) {
            let labels: Vec<&str> = labels.iter().filter_map(Value::as_str).collect();
            engine.configure(labels.as_slice());
            continue;
        }

        let sample: Sample = match serde_json::from_value(value) {
            Ok(s) => s,
            Err(err) => {
                warn!(line = idx + 1, error = %err, "unrecognized sample skipped");
                stats.malformed += 1;
                continue;
            }
        };
        let now = sample.t;
        engine.push_sample(sample);

        let Some(row) = engine.evaluate(now) else {
            continue;
        };
        if row.is_poor_quality() {
            stats.poor_quality += 1;
        } else {
            stats.rows += 1;
        }
        serde_json::to_writer(&mut *out, &Output::Row(&row))?;
        writeln!(out)?;

        if emit_confirmed && !row.is_poor_quality() {
            if let Some(confirmed) = engine.confirmed_stage(now) {
                stats.confirmed += 1;
                serde_json::to_writer(&mut *out, &Output::Confirmed(&confirmed))?;
                writeln!(out)?;
            }
        }
    }
    Ok(stats)
}
