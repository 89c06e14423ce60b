//! CLI argument definitions

use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tracepump",
    about = "Decode and analyze binary event trace streams",
    after_help = "\
EXAMPLES:
    tracepump trace.bin                          Log every event in a capture
    producer | tracepump                         Read a live stream from stdin
    tracepump trace.bin --events App.Tick        Log one event type only
    tracepump trace.bin --quiet --export s.json  Write statistics only"
)]
pub struct Args {
    /// Trace file to read (stdin when omitted)
    #[arg(value_name = "INPUT")]
    pub input: Option<PathBuf>,

    /// JSON configuration file for the engine and processor
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Only log these events, as Logger.Event (repeatable)
    #[arg(short, long = "events", value_name = "LOGGER.EVENT")]
    pub events: Vec<String>,

    /// Export per-event statistics as JSON
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Suppress the event log and the summary
    #[arg(short, long)]
    pub quiet: bool,
}
