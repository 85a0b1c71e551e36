#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # walkps
//!
//! Tracks the device location, reverse-geocodes every fix and prints the
//! address together with the distance from the first fix of the session.
//!
//! ## Subcommands
//!
//! - `walkps track` (default) — start tracking; every line on stdin (just
//!   press Enter) toggles tracking on/off; Ctrl-C or SIGTERM exits
//! - `walkps resolve --from LAT,LON --to LAT,LON` — one-shot lookup
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, clap subcommands, stdin toggle, shutdown
//! config.rs        — TOML + env-var configuration
//! tracker.rs       — LocationTracker: sessions, first fix, stale filtering
//! resolver.rs      — AddressResolver: geocode + distance → display text
//! fix.rs           — GeoFix, Vincenty distance
//! display.rs       — DisplaySink, TerminalSink
//! geocoder/
//!   mod.rs         — Geocoder trait, GeocodeError
//!   nominatim.rs   — HTTP reverse geocoding
//! provider/
//!   mod.rs         — FixProvider trait, ProviderEvent
//!   gnss.rs        — Quectel GNSS poller (AT+QGPSLOC)
//!   replay.rs      — recorded track playback
//! modem.rs         — serial AT command channel
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

use walkps::config::{Config, ProviderKind};
use walkps::{
    AddressResolver, FixProvider, GeoFix, LocationTracker, ModemFixProvider, NominatimGeocoder,
    ReplayFixProvider, TerminalSink,
};

/// Location tracker with reverse geocoding.
#[derive(Parser)]
#[command(name = "walkps", version)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long, global = true)]
    config: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Track location continuously (default when no subcommand given).
    Track,
    /// Resolve a single fix against a first fix and print the result.
    Resolve {
        /// First fix as `LAT,LON`.
        #[arg(long, value_parser = parse_lat_lon)]
        from: (f64, f64),
        /// Latest fix as `LAT,LON`.
        #[arg(long, value_parser = parse_lat_lon)]
        to: (f64, f64),
    },
}

fn parse_lat_lon(s: &str) -> Result<(f64, f64), String> {
    let (lat, lon) = s
        .split_once(',')
        .ok_or_else(|| format!("expected LAT,LON, got {s:?}"))?;
    let lat = lat
        .trim()
        .parse()
        .map_err(|e| format!("bad latitude {lat:?}: {e}"))?;
    let lon = lon
        .trim()
        .parse()
        .map_err(|e| format!("bad longitude {lon:?}: {e}"))?;
    Ok((lat, lon))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("walkps: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(log_filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command.unwrap_or(Commands::Track) {
        Commands::Track => run_track(config).await,
        Commands::Resolve { from, to } => run_resolve(config, from, to).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn build_resolver(config: &Config) -> Result<AddressResolver<NominatimGeocoder>, String> {
    let geocoder = NominatimGeocoder::new(&config.geocoder)?;
    info!("Geocoder: {}", geocoder.base_url());
    Ok(AddressResolver::new(Arc::new(geocoder), config.messages.clone())
        .with_max_results(config.tracker.max_results))
}

async fn run_resolve(config: Config, from: (f64, f64), to: (f64, f64)) -> Result<(), String> {
    let resolver = build_resolver(&config)?;
    let text = resolver
        .resolve_text(GeoFix::new(from.0, from.1), GeoFix::new(to.0, to.1))
        .await;
    println!("{text}");
    Ok(())
}

async fn run_track(config: Config) -> Result<(), String> {
    info!("walkps v{} starting", env!("CARGO_PKG_VERSION"));
    let resolver = build_resolver(&config)?;

    match config.provider.kind {
        ProviderKind::Modem => {
            info!("Provider: GNSS modem on {}", config.provider.modem.device);
            let provider = ModemFixProvider::open(&config.provider.modem)?;
            track_with(provider, resolver).await
        }
        ProviderKind::Replay => {
            info!("Provider: replaying {}", config.provider.replay.path);
            let provider = ReplayFixProvider::from_config(&config.provider.replay)?;
            track_with(provider, resolver).await
        }
    }
}

async fn track_with<P: FixProvider>(
    provider: P,
    resolver: AddressResolver<NominatimGeocoder>,
) -> Result<(), String> {
    let tracker = LocationTracker::new(provider, resolver, TerminalSink);
    tracker.start().await?;

    // Each stdin line toggles tracking, like a start/stop button.
    let toggler = tracker.clone();
    let stdin_task = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(_)) = lines.next_line().await {
            match toggler.toggle().await {
                Ok(active) => info!("Tracking {}", if active { "on" } else { "off" }),
                Err(e) => error!("Failed to start tracking: {e}"),
            }
        }
    });

    shutdown_signal().await;

    info!("Shutting down...");
    stdin_task.abort();
    tracker.stop().await;
    info!("Goodbye");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!("Failed to register SIGTERM: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
