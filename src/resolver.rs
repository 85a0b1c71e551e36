//! Address resolution for a (first fix, latest fix) pair.
//!
//! [`AddressResolver::resolve`] reverse-geocodes the latest fix and measures
//! how far it is from the first fix of the session. Geocoder failures are
//! classified into [`ResolutionErrorKind`] and never escape as anything but a
//! [`ResolutionError`]; [`AddressResolver::resolve_text`] flattens both
//! outcomes into the text shown to the user.

use std::sync::Arc;

use tracing::{debug, error};

use crate::config::Messages;
use crate::fix::GeoFix;
use crate::geocoder::{GeocodeError, Geocoder};

/// A successfully resolved address.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAddress {
    pub lines: Vec<String>,
    pub distance_meters: f64,
}

impl ResolvedAddress {
    /// Address lines joined by newlines, followed by `"<label>: <distance>"`
    /// with the distance to four decimal places.
    #[must_use]
    pub fn render(&self, distance_label: &str) -> String {
        let mut text = self.lines.join("\n");
        text.push_str(&format!("\n{distance_label}: {:.4}", self.distance_meters));
        text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionErrorKind {
    /// Network or provider unavailable.
    NoNetwork,
    /// Latitude/longitude rejected by the geocoder.
    InvalidCoordinates,
    /// Lookup succeeded but returned nothing.
    NoAddressFound,
}

/// A failed resolution, carrying the user-visible message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionError {
    pub kind: ResolutionErrorKind,
    pub message: String,
}

impl std::fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ResolutionError {}

/// Turns fix pairs into display text using a [`Geocoder`].
pub struct AddressResolver<G> {
    geocoder: Arc<G>,
    messages: Messages,
    max_results: usize,
}

impl<G> Clone for AddressResolver<G> {
    fn clone(&self) -> Self {
        Self {
            geocoder: Arc::clone(&self.geocoder),
            messages: self.messages.clone(),
            max_results: self.max_results,
        }
    }
}

impl<G: Geocoder> AddressResolver<G> {
    /// Create a resolver asking the geocoder for a single candidate.
    pub fn new(geocoder: Arc<G>, messages: Messages) -> Self {
        Self {
            geocoder,
            messages,
            max_results: 1,
        }
    }

    /// Override how many candidates are requested (the first is always used).
    #[must_use]
    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    /// Reverse-geocode `latest` and measure its distance from `first`.
    pub async fn resolve(
        &self,
        first: GeoFix,
        latest: GeoFix,
    ) -> Result<ResolvedAddress, ResolutionError> {
        let lat = latest.latitude;
        let lon = latest.longitude;

        let addresses = match self
            .geocoder
            .reverse_geocode(lat, lon, self.max_results)
            .await
        {
            Ok(addresses) => addresses,
            Err(GeocodeError::Io(e)) => {
                let message = self.messages.service_not_available.clone();
                error!("{message}: {e}");
                return Err(ResolutionError {
                    kind: ResolutionErrorKind::NoNetwork,
                    message,
                });
            }
            Err(GeocodeError::InvalidArgument(e)) => {
                let message = format!(
                    "{}. Latitude = {lat}, Longitude = {lon}",
                    self.messages.invalid_lat_long_used
                );
                error!("{message}: {e}");
                return Err(ResolutionError {
                    kind: ResolutionErrorKind::InvalidCoordinates,
                    message,
                });
            }
        };

        let Some(address) = addresses.into_iter().next() else {
            let message = self.messages.no_address_found.clone();
            error!("{message} for {lat:.6},{lon:.6}");
            return Err(ResolutionError {
                kind: ResolutionErrorKind::NoAddressFound,
                message,
            });
        };

        let distance_meters = first.distance_to(&latest);
        debug!(
            "Resolved {lat:.6},{lon:.6} ({} lines), {distance_meters:.1}m from first fix",
            address.lines.len()
        );
        Ok(ResolvedAddress {
            lines: address.lines,
            distance_meters,
        })
    }

    /// [`Self::resolve`], rendered: the formatted address or the error message.
    pub async fn resolve_text(&self, first: GeoFix, latest: GeoFix) -> String {
        match self.resolve(first, latest).await {
            Ok(resolved) => resolved.render(&self.messages.distance_label),
            Err(e) => e.message,
        }
    }
}
