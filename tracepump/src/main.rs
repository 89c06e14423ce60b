//! # tracepump - Main Entry Point
//!
//! Reads a trace from a file or stdin, logs its events and optionally exports
//! per-event statistics:
//! - **Log** (default): one line per event on stdout
//! - **Quiet** (`--quiet --export stats.json`): statistics only

// Byte counts are converted to f64 for the summary line
#![allow(clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use log::info;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::PoisonError;
use std::time::Instant;

use tracepump::analysis::{AnalysisEngine, Analyzer};
use tracepump::analyzers::{EventLogAnalyzer, EventStatsAnalyzer};
use tracepump::cli::Args;
use tracepump::config::ProcessorConfig;
use tracepump::domain::ConfigError;
use tracepump::processor::{AnalysisProcessor, ProcessorExit, ReaderSource};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_DATAERR: i32 = 65;

/// Events buffered between the pump thread and the printer.
const LOG_CHANNEL_CAPACITY: usize = 1000;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        return EXIT_USAGE;
    }
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("could not be decoded") {
        EXIT_DATAERR
    } else {
        EXIT_ERROR
    }
}

fn load_config(args: &Args) -> Result<ProcessorConfig> {
    match args.config {
        Some(ref path) => ProcessorConfig::from_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display())),
        None => Ok(ProcessorConfig::default()),
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;
    let config = load_config(&args)?;

    // ── Analyzers ───────────────────────────────────────────────────────
    let stats_analyzer = EventStatsAnalyzer::new();
    let stats = stats_analyzer.handle();
    let mut analyzers: Vec<Box<dyn Analyzer>> = vec![Box::new(stats_analyzer)];

    let printer = if quiet {
        None
    } else {
        let (event_tx, event_rx) = bounded(LOG_CHANNEL_CAPACITY);
        analyzers.push(Box::new(EventLogAnalyzer::new(event_tx).with_filter(&args.events)));

        // Printer exits once the log analyzer drops its sender
        Some(std::thread::spawn(move || {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for event in event_rx {
                if writeln!(out, "{event}").is_err() {
                    break;
                }
            }
        }))
    };

    // ── Source and processor ────────────────────────────────────────────
    let engine = AnalysisEngine::new(analyzers, config.engine.clone());
    let mut processor = match args.input {
        Some(ref path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open trace: {}", path.display()))?;
            AnalysisProcessor::new(engine, ReaderSource::new(file), config)
        }
        None => AnalysisProcessor::new(engine, ReaderSource::new(io::stdin()), config),
    };

    let started = Instant::now();
    processor.start()?;
    let control = processor.control();
    let mut waiter = tokio::task::spawn_blocking(move || processor.wait());

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let joined = tokio::select! {
        joined = &mut waiter => joined,
        _ = &mut ctrl_c => {
            info!("interrupted, stopping analysis");
            control.stop();
            waiter.await
        }
    };
    let report = joined.context("Analysis task failed")??;

    // The engine (and with it the log sender) is gone after this point
    let engine_stats = report.engine.stats().clone();
    drop(report.engine);
    if let Some(handle) = printer {
        handle.join().ok();
    }

    if !quiet {
        let elapsed = started.elapsed().as_secs_f64();
        let exit_reason = match report.exit {
            ProcessorExit::EndOfStream => "end of stream",
            ProcessorExit::Stopped => "interrupted",
            ProcessorExit::DecodeFailed => "decode failed",
            ProcessorExit::AnalyzersRetired => "all analyzers retired",
        };
        eprintln!(
            "\n{exit_reason}: {elapsed:.1}s, {} bytes ({:.1} MiB/s), {} events, {} declarations, {} unknown, {} schema errors",
            report.bytes_read,
            report.bytes_read as f64 / 1_048_576.0 / elapsed.max(f64::EPSILON),
            engine_stats.events,
            engine_stats.declarations,
            engine_stats.unknown_events,
            engine_stats.schema_errors,
        );
    }

    // Export statistics if enabled
    if let Some(ref export_path) = args.export {
        let file = File::create(export_path).context("Failed to create statistics file")?;
        let snapshot = stats.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.write_json(BufWriter::new(file)).context("Failed to export statistics")?;

        if !quiet {
            println!("saved: {}", export_path.display());
        }
    }

    if report.exit == ProcessorExit::DecodeFailed {
        anyhow::bail!("trace could not be decoded (see log for the failing record)");
    }
    Ok(())
}
