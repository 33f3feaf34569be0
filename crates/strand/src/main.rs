//! # strand
//!
//! Command-line access to a Strand event cache file: list cached rooms, dump
//! history, inspect single events, forget rooms and run migrations.

#![deny(unsafe_code)]

mod commands;

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use strand_settings::{StrandSettings, load_settings, load_settings_from_path};
use strand_store::{ConnectionConfig, EventCacheStore};
use strand_telemetry::{TelemetryConfig, init_telemetry};
use tracing::debug;

/// Strand event cache tool.
#[derive(Parser, Debug)]
#[command(name = "strand", about = "Inspect and maintain a Strand event cache")]
struct Cli {
    /// Path to the cache database (overrides settings).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Path to a settings file (default `~/.strand/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// List cached rooms with event counts and time span.
    Rooms {
        /// Print bare room ids only.
        #[arg(long)]
        ids: bool,
    },
    /// Print a room's history newest first, one JSON event per line.
    History {
        /// Room id.
        room: String,
        /// Maximum events to print.
        #[arg(long, default_value_t = 50)]
        limit: u32,
        /// Only events strictly older than this timestamp (ms).
        #[arg(long)]
        before: Option<i64>,
    },
    /// Print one event.
    Event {
        /// Event id.
        event_id: String,
    },
    /// Load protocol events (one JSON object per line) into a room.
    Import {
        /// Room id.
        room: String,
        /// JSON lines file.
        file: PathBuf,
    },
    /// Drop every cached event of a room.
    Forget {
        /// Room id.
        room: String,
    },
    /// Apply pending schema migrations and report the version.
    Migrate,
}

fn load(cli: &Cli) -> Result<StrandSettings> {
    match &cli.settings {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => load_settings().context("failed to load settings"),
    }
}

fn open_store(cli: &Cli, settings: &StrandSettings) -> Result<EventCacheStore> {
    let path = cli
        .db
        .clone()
        .unwrap_or_else(|| settings.store.resolved_path());
    let config = ConnectionConfig {
        pool_size: settings.store.pool_size,
        busy_timeout_ms: settings.store.busy_timeout_ms,
        cache_size_kib: settings.store.cache_size_kib,
    };
    debug!(path = %path.display(), "opening event cache");
    EventCacheStore::open(&path, &config)
        .with_context(|| format!("failed to open event cache at {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    let telemetry = TelemetryConfig {
        level: settings.logging.level.clone(),
        json: settings.logging.json,
        ..TelemetryConfig::default()
    };
    if let Err(e) = init_telemetry(&telemetry) {
        eprintln!("strand: logging disabled: {e}");
    }

    let store = open_store(&cli, &settings)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run(cli.command, &store, &mut out)
}

fn run(command: Command, store: &EventCacheStore, out: &mut impl Write) -> Result<()> {
    match command {
        Command::Rooms { ids: true } => commands::room_ids(store, out)?,
        Command::Rooms { ids: false } => commands::rooms(store, out)?,
        Command::History { room, limit, before } => {
            let _ = commands::history(store, &room, limit, before, out)?;
        }
        Command::Event { event_id } => {
            if !commands::event(store, &event_id, out)? {
                bail!("event {event_id} not found");
            }
        }
        Command::Import { room, file } => {
            let input = File::open(&file)
                .with_context(|| format!("failed to open {}", file.display()))?;
            let _ = commands::import(store, &room, BufReader::new(input), out)?;
        }
        Command::Forget { room } => {
            let _ = commands::forget(store, &room, out)?;
        }
        Command::Migrate => {
            let _ = commands::migrate(store, out)?;
        }
    }
    Ok(())
}
