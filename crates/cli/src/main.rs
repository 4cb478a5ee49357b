mod config;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use config::IndicatorConfig;
use investta_core::{IndicatorSeries, IndicatorValue, PricePoint, PriceSeries, Timeframe};
use investta_data::load_series_from_csv;
use investta_engine::{Backfill, BackfillError, LiveSession};
use investta_indicators::{IndicatorDefinition, IndicatorRegistry};
use rust_decimal::Decimal;
use serde::Serialize;
use std::path::PathBuf;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "investta")]
#[command(about = "Technical indicator engine: batch backfills and live replays over OHLCV data")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered indicator kinds
    Indicators,

    /// Evaluate indicators over a whole CSV file in one batch
    Compute {
        #[command(flatten)]
        input: InputArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,

        /// Only print the last N rows of the table
        #[arg(long)]
        tail: Option<usize>,
    },

    /// Feed a CSV file through a live session one candle at a time
    Replay {
        #[command(flatten)]
        input: InputArgs,

        /// Check streamed values against batch evaluation
        #[arg(long)]
        verify: bool,
    },
}

#[derive(Args)]
struct InputArgs {
    /// Path to CSV data file
    #[arg(short, long)]
    data: PathBuf,

    /// Candle interval of the data (e.g. 5m, 1h, 1d)
    #[arg(short, long, default_value = "1d")]
    timeframe: Timeframe,

    /// Indicator as kind[:name=value,...], e.g. "rsi:period=14" (repeatable)
    #[arg(short, long = "indicator")]
    indicators: Vec<IndicatorDefinition>,

    /// TOML file with [[indicators]] tables
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl InputArgs {
    /// Config file entries first, then command-line flags.
    fn definitions(&self) -> Result<Vec<IndicatorDefinition>> {
        let mut definitions = match &self.config {
            Some(path) => IndicatorConfig::load(path)?.indicators,
            None => Vec::new(),
        };
        definitions.extend(self.indicators.iter().cloned());
        if definitions.is_empty() {
            anyhow::bail!("No indicators requested; pass --indicator or --config");
        }
        Ok(definitions)
    }

    fn load_series(&self) -> Result<PriceSeries> {
        let series = load_series_from_csv(&self.data, self.timeframe)
            .with_context(|| format!("Failed to load {}", self.data.display()))?;
        tracing::info!(
            instrument = %series.instrument(),
            timeframe = %series.timeframe(),
            points = series.len(),
            "Loaded price series"
        );
        Ok(series)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let registry = IndicatorRegistry::default();

    match cli.command {
        Commands::Indicators => list_indicators(&registry)?,
        Commands::Compute {
            input,
            format,
            tail,
        } => compute(&registry, &input, format, tail).await?,
        Commands::Replay { input, verify } => replay(&registry, &input, verify).await?,
    }

    Ok(())
}

fn list_indicators(registry: &IndicatorRegistry) -> Result<()> {
    println!("Available indicators:");
    for kind in registry.kinds() {
        let factory = registry.factory(kind)?;
        println!(
            "  {:<10} {:<40} outputs: {}",
            kind.to_string(),
            factory.description(),
            factory.outputs().join(", ")
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct ComputeReport<'a> {
    instrument: &'a str,
    timeframe: Timeframe,
    points: usize,
    indicators: &'a [IndicatorSeries],
}

async fn compute(
    registry: &IndicatorRegistry,
    input: &InputArgs,
    format: OutputFormat,
    tail: Option<usize>,
) -> Result<()> {
    let definitions = input.definitions()?;
    let series = input.load_series()?;

    let backfill = Backfill::spawn(registry, series.points(), &definitions)?;
    let cancel = backfill.cancel_flag();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling backfill");
            cancel.cancel();
        }
    });
    let outcome = backfill.join().await;
    interrupt.abort();

    let results = match outcome {
        Ok(results) => results,
        Err(BackfillError::Cancelled) => {
            println!("Backfill cancelled, no results");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    match format {
        OutputFormat::Json => {
            let report = ComputeReport {
                instrument: series.instrument(),
                timeframe: series.timeframe(),
                points: series.len(),
                indicators: &results,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Table => {
            let columns = column_headers(registry, &definitions)?;
            let skip = tail.map_or(0, |n| series.len().saturating_sub(n));
            print_table(&series.points()[skip..], &columns, &results);
        }
    }
    Ok(())
}

/// One header per output line: the label alone for single-line indicators,
/// `label.line` otherwise.
fn column_headers(
    registry: &IndicatorRegistry,
    definitions: &[IndicatorDefinition],
) -> Result<Vec<Vec<String>>> {
    definitions
        .iter()
        .map(|def| {
            let label = def.label();
            let outputs = registry.outputs(&def.kind)?;
            Ok(if outputs.len() == 1 {
                vec![label]
            } else {
                outputs.iter().map(|o| format!("{}.{}", label, o)).collect()
            })
        })
        .collect()
}

fn print_table(points: &[PricePoint], columns: &[Vec<String>], results: &[IndicatorSeries]) {
    let mut header = vec!["timestamp".to_string(), "close".to_string()];
    header.extend(columns.iter().flatten().cloned());

    let rows: Vec<Vec<String>> = points
        .iter()
        .map(|p| {
            let mut row = vec![
                p.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                p.close.to_string(),
            ];
            for (names, series) in columns.iter().zip(results) {
                match series.at(p.timestamp).and_then(|v| v.output) {
                    Some(output) => row.extend(output.as_slice().iter().map(|v| v.to_string())),
                    None => row.extend(names.iter().map(|_| "-".to_string())),
                }
            }
            row
        })
        .collect();

    let widths: Vec<usize> = (0..header.len())
        .map(|i| {
            rows.iter()
                .map(|r| r[i].len())
                .chain(std::iter::once(header[i].len()))
                .max()
                .unwrap_or(0)
        })
        .collect();
    let render = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:>w$}", c, w = *w))
            .collect::<Vec<_>>()
            .join("  ")
    };

    let sep = "=".repeat(widths.iter().sum::<usize>() + 2 * widths.len().saturating_sub(1));
    println!("{sep}");
    println!("{}", render(&header));
    println!("{sep}");
    for row in &rows {
        println!("{}", render(row));
    }
    println!("{sep}");
}

async fn replay(registry: &IndicatorRegistry, input: &InputArgs, verify: bool) -> Result<()> {
    let definitions = input.definitions()?;
    let history = input.load_series()?;

    let mut session = LiveSession::new(PriceSeries::new(history.instrument(), history.timeframe()));
    let receivers = definitions
        .iter()
        .map(|def| session.attach(registry, def))
        .collect::<Result<Vec<_>, _>>()?;

    let (tx, rx) = mpsc::channel(1024);
    let consumer = tokio::spawn(session.run(rx));
    for point in history.points() {
        tx.send(*point)
            .await
            .context("Live session stopped before the replay finished")?;
    }
    drop(tx);
    let session = consumer.await?;

    tracing::info!(
        instrument = %session.series().instrument(),
        points = session.series().len(),
        indicators = definitions.len(),
        "Replay complete"
    );

    let sep = "=".repeat(60);
    println!("\n{sep}");
    println!("  LATEST VALUES  {} ({})", history.instrument(), history.timeframe());
    println!("{sep}");
    for (def, rx) in definitions.iter().zip(&receivers) {
        let latest = *rx.borrow();
        match latest.and_then(|v| v.output.map(|o| (v.timestamp, o))) {
            Some((timestamp, output)) => {
                let values: Vec<String> = output.as_slice().iter().map(|v| v.to_string()).collect();
                println!(
                    "  {:<36} {}  {}",
                    def.label(),
                    timestamp.format("%Y-%m-%d %H:%M:%S"),
                    values.join(" / ")
                );
            }
            None => println!("  {:<36} warming up", def.label()),
        }
    }
    println!("{sep}\n");

    if verify {
        let mismatches = verify_against_batch(registry, &definitions, history.points(), &receivers)?;
        if mismatches > 0 {
            anyhow::bail!("{} indicator(s) disagree with batch evaluation", mismatches);
        }
        println!("All {} indicator(s) match batch evaluation", definitions.len());
    }
    Ok(())
}

/// Largest per-line difference `--verify` accepts. Sources such as hlc3
/// divide, so running and fresh window sums may round differently.
fn verify_tolerance() -> Decimal {
    Decimal::new(1, 10)
}

/// Whether two runs produced the same readings at the same timestamps.
fn series_agree(expected: &[IndicatorValue], actual: &[IndicatorValue], tolerance: Decimal) -> bool {
    expected.len() == actual.len()
        && expected
            .iter()
            .zip(actual)
            .all(|(e, a)| e.approx_eq(a, tolerance))
}

/// Compare each streamed indicator with a batch evaluation over the same
/// points. Returns the number of definitions that disagree.
fn verify_against_batch(
    registry: &IndicatorRegistry,
    definitions: &[IndicatorDefinition],
    points: &[PricePoint],
    receivers: &[watch::Receiver<Option<IndicatorValue>>],
) -> Result<usize> {
    let tolerance = verify_tolerance();
    let mut mismatches = 0;
    for (def, rx) in definitions.iter().zip(receivers) {
        let batch = registry.evaluate(points, def)?;
        let streamed: Vec<IndicatorValue> = registry
            .incremental(def)?
            .rebuild(points)?
            .into_iter()
            .filter(|v| v.is_defined())
            .collect();
        let latest: Vec<IndicatorValue> = rx.borrow().filter(|v| v.is_defined()).into_iter().collect();
        let expected_latest: Vec<IndicatorValue> = batch.last().copied().into_iter().collect();

        if series_agree(&batch.values, &streamed, tolerance)
            && series_agree(&expected_latest, &latest, tolerance)
        {
            tracing::debug!(indicator = %def, values = batch.len(), "Verified");
        } else {
            mismatches += 1;
            tracing::warn!(
                indicator = %def,
                batch = batch.len(),
                streamed = streamed.len(),
                "Streamed values differ from batch evaluation"
            );
        }
    }
    Ok(mismatches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use investta_core::Output;
    use rust_decimal_macros::dec;

    fn candles(n: i64) -> Vec<PricePoint> {
        let start = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let mut close = dec!(1234567.89000000);
        (0..n)
            .map(|i| {
                close += Decimal::new((i * 4721 % 1999) - 999, 8) * dec!(53);
                let high = close + dec!(0.12345678);
                let low = close - dec!(0.87654321);
                PricePoint::new(start + Duration::minutes(i), close, high, low, close, dec!(1)).unwrap()
            })
            .collect()
    }

    #[test]
    fn test_series_agree_within_tolerance() {
        let t = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let a = [IndicatorValue::defined(t, Output::single(dec!(50.00000000000001)))];
        let b = [IndicatorValue::defined(t, Output::single(dec!(50)))];
        let far = [IndicatorValue::defined(t, Output::single(dec!(50.001)))];

        assert!(series_agree(&a, &b, verify_tolerance()));
        assert!(!series_agree(&a, &far, verify_tolerance()));
        assert!(!series_agree(&a, &[], verify_tolerance()));
        assert!(series_agree(&[], &[], verify_tolerance()));
    }

    #[test]
    fn test_replay_verifies_every_builtin_on_eight_decimal_prices() {
        let registry = IndicatorRegistry::default();
        let points = candles(2500);
        let definitions: Vec<IndicatorDefinition> = [
            "sma:period=20,source=hlc3",
            "ema:period=12,source=ohlc4",
            "rsi",
            "bollinger",
            "bollinger:period=10,std_dev=1.5,source=hl2",
            "macd",
        ]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();

        let mut session = LiveSession::new(PriceSeries::new("BTCUSD", Timeframe::Minute(1)));
        let receivers: Vec<_> = definitions
            .iter()
            .map(|d| session.attach(&registry, d).unwrap())
            .collect();
        for point in &points {
            session.push(*point).unwrap();
        }

        let mismatches = verify_against_batch(&registry, &definitions, &points, &receivers).unwrap();
        assert_eq!(mismatches, 0);
    }
}
