//! # framelock-sim
//!
//! Runs a whole framelock cluster in one process through the swap-barrier
//! warmup and reports how every node did.
//!
//! The nodes talk over an in-process network and present through a
//! simulated swap barrier. Exits with a non-zero status when any node failed
//! to warm up.
//!
//! ## Example
//!
//! ```bash
//! # Two repeaters, barrier with one present of slack
//! framelock-sim --repeaters 2 --slack 1
//!
//! # Lossy network, machine-readable report
//! framelock-sim --repeaters 3 --drop-every 5 --json
//!
//! # Settings from a file, flags override it
//! framelock-sim --config cluster.toml --repeaters 4
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use framelock_node::{run_simulation, SimulationSettings};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod report;

/// Run a simulated framelock cluster through the swap-barrier warmup.
#[derive(Parser, Debug)]
#[command(name = "framelock-sim")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Settings file (TOML); flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of repeaters
    #[arg(long)]
    repeaters: Option<u8>,

    /// Presents a node may run ahead of the slowest one (0: no latency, 1: pre-present wait)
    #[arg(long)]
    slack: Option<u64>,

    /// Time before the barrier starts blocking
    #[arg(long)]
    activation_delay_ms: Option<u64>,

    /// Drop every n-th network message
    #[arg(long)]
    drop_every: Option<u64>,

    /// Repeaters render one frame behind the emitter
    #[arg(long)]
    delayed: bool,

    /// Make the last repeater a backup and promote it to emitter once warmed up
    #[arg(long)]
    promote_backup: bool,

    /// Frames each node renders after its warmup
    #[arg(long)]
    frames_after_warmup: Option<u32>,

    /// Handshake timeout
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn settings(&self) -> Result<SimulationSettings> {
        let mut settings = match &self.config {
            Some(path) => SimulationSettings::from_file(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => SimulationSettings::default(),
        };

        if let Some(repeaters) = self.repeaters {
            settings.repeaters = repeaters;
        }
        if let Some(slack) = self.slack {
            settings.slack = slack;
        }
        if let Some(delay) = self.activation_delay_ms {
            settings.activation_delay_ms = delay;
        }
        if let Some(drop_every) = self.drop_every {
            settings.drop_every = drop_every;
        }
        if let Some(frames) = self.frames_after_warmup {
            settings.frames_after_warmup = frames;
        }
        if let Some(timeout) = self.timeout_ms {
            settings.warmup.handshake_timeout_ms = timeout;
        }
        if self.delayed {
            settings.warmup.repeaters_delayed = true;
        }
        if self.promote_backup {
            settings.promote_backup = true;
        }

        if settings.promote_backup && settings.repeaters == 0 {
            anyhow::bail!("--promote-backup needs at least one repeater");
        }
        Ok(settings)
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr so that --json output stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let settings = cli.settings()?;
    let outcome = run_simulation(&settings).context("Failed to run the simulation")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        report::print(&settings, &outcome);
    }

    Ok(if outcome.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
