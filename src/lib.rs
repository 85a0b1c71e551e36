#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

//! walkps library — location tracking with reverse geocoding.
//!
//! - `tracker` — start/stop sessions, first-fix baseline, stale-result filtering
//! - `resolver` — address lookup + distance from the first fix
//! - `fix` — `GeoFix` and Vincenty distance on WGS84
//! - `geocoder` — `Geocoder` trait and the Nominatim HTTP backend
//! - `provider` — `FixProvider` trait, GNSS modem poller, track replay
//! - `modem` — serial AT command channel
//! - `display` — `DisplaySink` trait and terminal output
//! - `config` — configuration loading

pub mod config;
pub mod display;
pub mod fix;
pub mod geocoder;
pub mod modem;
pub mod provider;
pub mod resolver;
pub mod tracker;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use display::{DisplaySink, TerminalSink};
pub use fix::GeoFix;
pub use geocoder::{Address, GeocodeError, Geocoder, NominatimGeocoder};
pub use provider::{FixProvider, ModemFixProvider, ProviderEvent, ReplayFixProvider};
pub use resolver::{AddressResolver, ResolutionError, ResolutionErrorKind, ResolvedAddress};
pub use tracker::{LocationTracker, TrackingSession};
