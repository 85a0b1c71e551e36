//! Fixes from a Quectel GNSS engine via AT commands.
//!
//! On subscribe a background poller enables the engine (`AT+QGPS=1`, up to
//! three attempts), then sends `AT+QGPSLOC=2` every `poll_interval_secs` and
//! forwards each parsed position. `+CME ERROR: 516` means the engine is still
//! searching for satellites. Availability is reported on transitions only:
//! `true` with the first fix, `false` when the engine starts searching or
//! erroring. Three consecutive errors trigger a re-enable. On unsubscribe the
//! poller stops and the engine is switched off (`AT+QGPSEND`).

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{FixProvider, ProviderEvent};
use crate::config::ModemConfig;
use crate::fix::{now_epoch_secs, GeoFix};
use crate::modem::AtPort;

/// Consecutive poll failures before the engine is re-enabled.
const MAX_CONSECUTIVE_ERRORS: u32 = 3;
/// Enable attempts on subscribe.
const ENABLE_ATTEMPTS: u32 = 3;

/// Anything that can run an AT command and return the cleaned reply.
pub trait AtTransport: Clone + Send + Sync + 'static {
    fn command(&self, cmd: &str) -> impl Future<Output = Result<String, String>> + Send;
}

impl AtTransport for AtPort {
    async fn command(&self, cmd: &str) -> Result<String, String> {
        AtPort::command(self, cmd).await
    }
}

/// One `AT+QGPSLOC=2` position report.
#[derive(Debug, Clone, PartialEq)]
pub struct GnssReading {
    pub fix: GeoFix,
    pub altitude: f64,
    /// Horizontal dilution of precision.
    pub hdop: f64,
    pub satellites: u32,
}

#[derive(Debug, PartialEq)]
enum LocError {
    /// No fix yet (CME ERROR 516).
    Searching,
    Failed(String),
}

/// [`FixProvider`] polling a GNSS modem.
pub struct ModemFixProvider<T: AtTransport = AtPort> {
    port: T,
    config: ModemConfig,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ModemFixProvider<AtPort> {
    /// Open the serial port named in `[provider.modem]`.
    pub fn open(config: &ModemConfig) -> Result<Self, String> {
        let port = AtPort::open(&config.device)?;
        Ok(Self::with_transport(port, config.clone()))
    }
}

impl<T: AtTransport> ModemFixProvider<T> {
    pub fn with_transport(port: T, config: ModemConfig) -> Self {
        Self {
            port,
            config,
            task: Mutex::new(None),
        }
    }
}

impl<T: AtTransport> FixProvider for ModemFixProvider<T> {
    fn subscribe(&self, events: mpsc::Sender<ProviderEvent>) -> Result<(), String> {
        let handle = tokio::spawn(poll_loop(self.port.clone(), self.config.clone(), events));
        let mut task = self.task.lock().map_err(|_| "GNSS task lock poisoned")?;
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
        // The poller must be gone before the engine goes off, or a late
        // command of its own could follow AT+QGPSEND.
        let _ = handle.await;

        if self.config.auto_enable {
            disable_gnss(&self.port).await;
        }
    }
}

async fn disable_gnss<T: AtTransport>(port: &T) {
    match port.command("AT+QGPSEND").await {
        Ok(resp) if resp.contains("OK") => info!("GNSS: engine disabled"),
        Ok(resp) => debug!("GNSS: AT+QGPSEND response: {}", resp.trim()),
        Err(e) => warn!("GNSS: failed to disable engine: {e}"),
    }
}

/// `true` once the engine reports it is running.
async fn enable_gnss<T: AtTransport>(port: &T) -> bool {
    for attempt in 1..=ENABLE_ATTEMPTS {
        match port.command("AT+QGPS=1").await {
            // 504 = session already ongoing
            Ok(resp) if resp.contains("OK") || resp.contains("504") => {
                info!("GNSS: engine enabled (attempt {attempt})");
                return true;
            }
            Ok(resp) => warn!("GNSS: enable rejected (attempt {attempt}): {}", resp.trim()),
            Err(e) => warn!("GNSS: enable failed (attempt {attempt}): {e}"),
        }
        if attempt < ENABLE_ATTEMPTS {
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
    }
    false
}

async fn poll_loop<T: AtTransport>(
    port: T,
    config: ModemConfig,
    events: mpsc::Sender<ProviderEvent>,
) {
    if config.auto_enable && !enable_gnss(&port).await {
        warn!("GNSS: engine not enabled after {ENABLE_ATTEMPTS} attempts, polling anyway");
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(config.poll_interval_secs.max(1)));
    // The first tick fires immediately; give the engine one interval to warm up.
    ticker.tick().await;

    let mut available: Option<bool> = None;
    let mut consecutive_errors: u32 = 0;

    loop {
        ticker.tick().await;

        let outcome = match port.command("AT+QGPSLOC=2").await {
            Ok(resp) => parse_qgpsloc(&resp),
            Err(e) => Err(LocError::Failed(e)),
        };

        let (now_available, fix) = match outcome {
            Ok(reading) => {
                debug!(
                    "GNSS: fix {:.6},{:.6} alt={:.0}m sats={} hdop={:.1}",
                    reading.fix.latitude,
                    reading.fix.longitude,
                    reading.altitude,
                    reading.satellites,
                    reading.hdop
                );
                consecutive_errors = 0;
                (true, Some(reading.fix))
            }
            Err(LocError::Searching) => {
                debug!("GNSS: searching for satellites");
                consecutive_errors = 0;
                (false, None)
            }
            Err(LocError::Failed(e)) => {
                consecutive_errors += 1;
                warn!("GNSS: poll failed ({consecutive_errors}/{MAX_CONSECUTIVE_ERRORS}): {e}");
                (false, None)
            }
        };

        if available != Some(now_available) {
            available = Some(now_available);
            if events
                .send(ProviderEvent::Availability(now_available))
                .await
                .is_err()
            {
                return;
            }
        }
        if let Some(fix) = fix {
            if events.send(ProviderEvent::Fix(fix)).await.is_err() {
                return;
            }
        }

        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
            warn!("GNSS: {consecutive_errors} consecutive errors, re-enabling engine");
            consecutive_errors = 0;
            enable_gnss(&port).await;
        }
    }
}

/// Parse an `AT+QGPSLOC=2` reply (decimal degrees).
///
/// ```text
/// +QGPSLOC: <UTC>,<lat>,<lon>,<hdop>,<alt>,<fix>,<cog>,<spkm>,<spkn>,<date>,<nsat>
/// ```
fn parse_qgpsloc(response: &str) -> Result<GnssReading, LocError> {
    // A stale ERROR can precede a valid report, so the report wins.
    let Some(line) = response.lines().find(|l| l.contains("+QGPSLOC:")) else {
        if response.contains("ERROR") && response.contains("516") {
            return Err(LocError::Searching);
        }
        return Err(LocError::Failed(format!(
            "no +QGPSLOC in reply: {}",
            response.trim()
        )));
    };

    let data = line
        .split_once(':')
        .map(|(_, rest)| rest.trim())
        .unwrap_or_default();
    let fields: Vec<&str> = data.split(',').map(str::trim).collect();
    if fields.len() < 11 {
        return Err(LocError::Failed(format!(
            "expected 11 fields in QGPSLOC, got {}: {data}",
            fields.len()
        )));
    }

    let num = |idx: usize, name: &str| -> Result<f64, LocError> {
        fields[idx]
            .parse()
            .map_err(|e| LocError::Failed(format!("bad {name}: {e}")))
    };

    Ok(GnssReading {
        fix: GeoFix {
            latitude: num(1, "lat")?,
            longitude: num(2, "lon")?,
            recorded_at: now_epoch_secs(),
        },
        hdop: num(3, "hdop")?,
        altitude: num(4, "alt")?,
        satellites: fields[10]
            .parse()
            .map_err(|e| LocError::Failed(format!("bad nsat: {e}")))?,
    })
}
