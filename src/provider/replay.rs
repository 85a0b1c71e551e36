//! Replays a recorded track file as a live fix stream.
//!
//! Track format, one fix per line:
//!
//! ```text
//! # lat,lon
//! 25.0330,121.5654
//! 25.0340,121.5664
//! ```
//!
//! Blank lines and `#` comments are skipped; extra columns are ignored.
//! Fixes are emitted every `interval`, stamped with the time of emission.
//! The replay position survives unsubscribe/subscribe, so stopping and
//! restarting tracking continues the walk instead of rewinding it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::{FixProvider, ProviderEvent};
use crate::config::ReplayConfig;
use crate::fix::GeoFix;

/// [`FixProvider`] backed by an in-memory track.
pub struct ReplayFixProvider {
    track: Arc<Vec<(f64, f64)>>,
    interval: Duration,
    cursor: Arc<AtomicUsize>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ReplayFixProvider {
    /// A zero `interval` is raised to one millisecond.
    #[must_use]
    pub fn new(track: Vec<(f64, f64)>, interval: Duration) -> Self {
        Self {
            track: Arc::new(track),
            interval: interval.max(Duration::from_millis(1)),
            cursor: Arc::new(AtomicUsize::new(0)),
            task: Mutex::new(None),
        }
    }

    /// Load the track named by the `[provider.replay]` section.
    pub fn from_config(config: &ReplayConfig) -> Result<Self, String> {
        if config.interval_ms == 0 {
            return Err("provider.replay.interval_ms must be at least 1".to_string());
        }
        let content = std::fs::read_to_string(&config.path)
            .map_err(|e| format!("read track file {}: {e}", config.path))?;
        let track = parse_track(&content).map_err(|e| format!("{}: {e}", config.path))?;
        info!("Replay: loaded {} fixes from {}", track.len(), config.path);
        Ok(Self::new(track, Duration::from_millis(config.interval_ms)))
    }

    /// Fixes not yet emitted.
    pub fn remaining(&self) -> usize {
        self.track
            .len()
            .saturating_sub(self.cursor.load(Ordering::SeqCst))
    }
}

impl FixProvider for ReplayFixProvider {
    fn subscribe(&self, events: mpsc::Sender<ProviderEvent>) -> Result<(), String> {
        let track = Arc::clone(&self.track);
        let cursor = Arc::clone(&self.cursor);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            if events.send(ProviderEvent::Availability(true)).await.is_err() {
                return;
            }
            let mut ticker = tokio::time::interval(interval);
            loop {
                let idx = cursor.load(Ordering::SeqCst);
                let Some(&(lat, lon)) = track.get(idx) else {
                    debug!("Replay: track exhausted after {idx} fixes");
                    let _ = events.send(ProviderEvent::Availability(false)).await;
                    return;
                };
                ticker.tick().await;
                if events
                    .send(ProviderEvent::Fix(GeoFix::new(lat, lon)))
                    .await
                    .is_err()
                {
                    return;
                }
                cursor.store(idx + 1, Ordering::SeqCst);
            }
        });

        let mut task = self.task.lock().map_err(|_| "replay task lock poisoned")?;
        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn unsubscribe(&self) {
        let Some(handle) = self.task.lock().ok().and_then(|mut t| t.take()) else {
            return;
        };
        handle.abort();
        let _ = handle.await;
    }
}

/// Parse `lat,lon` lines into coordinate pairs.
pub fn parse_track(content: &str) -> Result<Vec<(f64, f64)>, String> {
    let mut track = Vec::new();
    for (n, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split(',').map(str::trim);
        let (Some(lat), Some(lon)) = (fields.next(), fields.next()) else {
            return Err(format!("line {}: expected `lat,lon`, got {line:?}", n + 1));
        };
        let lat: f64 = lat
            .parse()
            .map_err(|e| format!("line {}: bad latitude: {e}", n + 1))?;
        let lon: f64 = lon
            .parse()
            .map_err(|e| format!("line {}: bad longitude: {e}", n + 1))?;
        track.push((lat, lon));
    }
    Ok(track)
}
