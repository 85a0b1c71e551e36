//! Reverse geocoding backends.
//!
//! A [`Geocoder`] turns a coordinate pair into zero or more candidate
//! [`Address`]es. Backends report transport/provider trouble as
//! [`GeocodeError::Io`] and out-of-range input as
//! [`GeocodeError::InvalidArgument`]; "nothing found" is an empty list.

pub mod nominatim;

use std::future::Future;

use crate::fix::coordinates_in_range;

pub use nominatim::NominatimGeocoder;

/// One candidate address, as ordered human-readable lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub lines: Vec<String>,
}

impl Address {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

/// Errors a geocoding backend can raise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeocodeError {
    /// Network failure or the provider is unavailable.
    Io(String),
    /// Latitude or longitude outside the valid range.
    InvalidArgument(String),
}

impl std::fmt::Display for GeocodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeocodeError::Io(e) => write!(f, "Geocoder I/O error: {e}"),
            GeocodeError::InvalidArgument(e) => write!(f, "Invalid geocoder argument: {e}"),
        }
    }
}

impl std::error::Error for GeocodeError {}

/// Reverse geocoding backend.
pub trait Geocoder: Send + Sync + 'static {
    /// Look up at most `max_results` candidate addresses for a coordinate.
    fn reverse_geocode(
        &self,
        latitude: f64,
        longitude: f64,
        max_results: usize,
    ) -> impl Future<Output = Result<Vec<Address>, GeocodeError>> + Send;
}

/// Reject coordinates outside the WGS84 ranges before any lookup is made.
pub fn check_coordinates(latitude: f64, longitude: f64) -> Result<(), GeocodeError> {
    if coordinates_in_range(latitude, longitude) {
        Ok(())
    } else {
        Err(GeocodeError::InvalidArgument(format!(
            "latitude {latitude} / longitude {longitude} out of range"
        )))
    }
}
