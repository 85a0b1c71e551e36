//! HTTP reverse geocoding against a Nominatim-compatible service.
//!
//! Issues `GET {base_url}/reverse?format=jsonv2&lat=..&lon=..&addressdetails=1`
//! and converts the structured `address` object into display lines:
//!
//! ```text
//! <house_number> <road>
//! <suburb>, <city|town|village>, <postcode>
//! <state>, <country>
//! ```
//!
//! Empty lines are dropped; when nothing structured is available the
//! `display_name` is used as a single line. Nominatim answers "nothing here"
//! with `{"error": "Unable to geocode"}` and HTTP 200, which maps to an empty
//! candidate list rather than an error.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use super::{check_coordinates, Address, GeocodeError, Geocoder};
use crate::config::GeocoderConfig;

/// Reverse geocoder backed by a Nominatim `/reverse` endpoint.
pub struct NominatimGeocoder {
    http: reqwest::Client,
    base_url: String,
    language: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ReverseResponse {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    address: Option<AddressDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct AddressDetails {
    house_number: Option<String>,
    road: Option<String>,
    suburb: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    hamlet: Option<String>,
    postcode: Option<String>,
    state: Option<String>,
    country: Option<String>,
}

impl NominatimGeocoder {
    /// Build a geocoder from the `[geocoder]` config section.
    pub fn new(config: &GeocoderConfig) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| format!("build HTTP client: {e}"))?;
        // Strip trailing slash for consistent URL construction
        let base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(Self {
            http,
            base_url,
            language: config.language.clone(),
        })
    }

    /// The service base URL (without trailing slash).
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn fetch(&self, latitude: f64, longitude: f64) -> Result<ReverseResponse, GeocodeError> {
        let mut request = self.http.get(format!("{}/reverse", self.base_url)).query(&[
            ("format", "jsonv2".to_string()),
            ("lat", latitude.to_string()),
            ("lon", longitude.to_string()),
            ("addressdetails", "1".to_string()),
        ]);
        if let Some(lang) = &self.language {
            request = request.header(reqwest::header::ACCEPT_LANGUAGE, lang.as_str());
        }

        let resp = request
            .send()
            .await
            .map_err(|e| GeocodeError::Io(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GeocodeError::Io(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| GeocodeError::Io(format!("read body: {e}")))?;
        parse_reverse(&body)
    }
}

impl Geocoder for NominatimGeocoder {
    async fn reverse_geocode(
        &self,
        latitude: f64,
        longitude: f64,
        max_results: usize,
    ) -> Result<Vec<Address>, GeocodeError> {
        check_coordinates(latitude, longitude)?;
        if max_results == 0 {
            return Ok(Vec::new());
        }

        let response = self.fetch(latitude, longitude).await?;
        if let Some(e) = &response.error {
            debug!("Nominatim: no result for {latitude:.6},{longitude:.6}: {e}");
            return Ok(Vec::new());
        }

        // The reverse endpoint yields at most one place.
        Ok(address_from_response(response).into_iter().collect())
    }
}

fn parse_reverse(body: &str) -> Result<ReverseResponse, GeocodeError> {
    serde_json::from_str(body).map_err(|e| GeocodeError::Io(format!("malformed response: {e}")))
}

fn address_from_response(response: ReverseResponse) -> Option<Address> {
    let lines = response
        .address
        .as_ref()
        .map(address_lines)
        .unwrap_or_default();
    if !lines.is_empty() {
        return Some(Address { lines });
    }
    response
        .display_name
        .filter(|name| !name.trim().is_empty())
        .map(|name| Address { lines: vec![name] })
}

fn address_lines(details: &AddressDetails) -> Vec<String> {
    let street = join_present(
        &[details.house_number.as_deref(), details.road.as_deref()],
        " ",
    );
    let locality = details
        .city
        .as_deref()
        .or(details.town.as_deref())
        .or(details.village.as_deref())
        .or(details.hamlet.as_deref());
    let area = join_present(
        &[details.suburb.as_deref(), locality, details.postcode.as_deref()],
        ", ",
    );
    let region = join_present(&[details.state.as_deref(), details.country.as_deref()], ", ");

    [street, area, region]
        .into_iter()
        .filter(|line| !line.is_empty())
        .collect()
}

fn join_present(parts: &[Option<&str>], sep: &str) -> String {
    parts
        .iter()
        .flatten()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_address() {
        let body = r#"{
            "place_id": 1,
            "lat": "25.0340",
            "lon": "121.5664",
            "display_name": "1, Some Road, Xinyi, Taipei, 110, Taiwan",
            "address": {
                "house_number": "1",
                "road": "Some Road",
                "suburb": "Xinyi",
                "city": "Taipei",
                "postcode": "110",
                "country": "Taiwan",
                "country_code": "tw"
            }
        }"#;
        let addr = address_from_response(parse_reverse(body).unwrap()).unwrap();
        assert_eq!(
            addr.lines,
            vec!["1 Some Road", "Xinyi, Taipei, 110", "Taiwan"]
        );
    }

    #[test]
    fn test_parse_town_fallback() {
        let body = r#"{"address": {"road": "High Street", "town": "Kendal", "state": "England", "country": "United Kingdom"}}"#;
        let addr = address_from_response(parse_reverse(body).unwrap()).unwrap();
        assert_eq!(
            addr.lines,
            vec!["High Street", "Kendal", "England, United Kingdom"]
        );
    }

    #[test]
    fn test_parse_display_name_only() {
        let body = r#"{"display_name": "Somewhere at sea"}"#;
        let addr = address_from_response(parse_reverse(body).unwrap()).unwrap();
        assert_eq!(addr.lines, vec!["Somewhere at sea"]);
    }

    #[test]
    fn test_parse_error_body() {
        let resp = parse_reverse(r#"{"error": "Unable to geocode"}"#).unwrap();
        assert_eq!(resp.error.as_deref(), Some("Unable to geocode"));
    }

    #[test]
    fn test_parse_empty_object_has_no_address() {
        let resp = parse_reverse("{}").unwrap();
        assert!(address_from_response(resp).is_none());
    }

    #[test]
    fn test_parse_malformed_is_io_error() {
        let err = parse_reverse("<html>502 Bad Gateway</html>").unwrap_err();
        assert!(matches!(err, GeocodeError::Io(_)));
    }

    #[tokio::test]
    async fn test_invalid_coordinates_rejected_without_request() {
        let geocoder = NominatimGeocoder::new(&GeocoderConfig {
            // Unroutable address: a request here would fail as Io, not InvalidArgument.
            base_url: "http://127.0.0.1:9/".to_string(),
            ..GeocoderConfig::default()
        })
        .unwrap();
        assert_eq!(geocoder.base_url(), "http://127.0.0.1:9");
        let err = geocoder.reverse_geocode(123.0, 0.0, 1).await.unwrap_err();
        assert!(matches!(err, GeocodeError::InvalidArgument(_)));
    }
}
