use crate::constants::NOMINATIM_MIN_INTERVAL_MS;
use crate::models::Coordinate;
use async_trait::async_trait;
use reverse_geocoder::ReverseGeocoder;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

/// Forward and reverse geocoding behind one interface.
///
/// Neither direction reports errors: a miss, a backend failure and a timeout
/// all come back as `None`.
#[async_trait]
pub trait GeoLocationResolver: Send + Sync {
    /// `"<locality>, <country>"` for a coordinate.
    async fn reverse_geocode(&self, coordinate: Coordinate) -> Option<String>;

    /// Coordinate of the first match for a place label.
    async fn forward_geocode(&self, place_label: &str) -> Option<Coordinate>;
}

/// Joins the finest available locality with the country.
pub fn format_place_label(locality: Option<&str>, country: Option<&str>) -> Option<String> {
    let clean = |s: Option<&str>| s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    match (clean(locality), clean(country)) {
        (Some(locality), Some(country)) => Some(format!("{}, {}", locality, country)),
        (None, Some(country)) => Some(country),
        (Some(locality), None) => Some(locality),
        (None, None) => None,
    }
}

// OpenStreetMap Nominatim backend

#[derive(Debug, Deserialize, Default)]
struct NominatimAddress {
    neighbourhood: Option<String>,
    suburb: Option<String>,
    city_district: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    county: Option<String>,
    state: Option<String>,
    country: Option<String>,
}

impl NominatimAddress {
    /// Prefers the finer-grained subdivision of a city over the city itself.
    fn locality(&self) -> Option<&str> {
        [
            &self.suburb,
            &self.neighbourhood,
            &self.city_district,
            &self.city,
            &self.town,
            &self.village,
            &self.municipality,
            &self.county,
            &self.state,
        ]
        .into_iter()
        .find_map(|part| part.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct NominatimReverse {
    #[serde(default)]
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

fn place_label_from_reverse(body: &str) -> Option<String> {
    let reverse: NominatimReverse = serde_json::from_str(body).ok()?;
    let address = reverse.address?;
    format_place_label(address.locality(), address.country.as_deref())
}

fn coordinate_from_search(body: &str) -> Option<Coordinate> {
    let places: Vec<NominatimPlace> = serde_json::from_str(body).ok()?;
    let first = places.first()?;
    let coordinate = Coordinate::new(first.lat.parse().ok()?, first.lon.parse().ok()?);
    coordinate.is_valid().then_some(coordinate)
}

/// HTTP geocoder speaking the Nominatim `/reverse` and `/search` API.
///
/// Requests are serialized and spaced at least `min_interval` apart, so concurrent
/// imports stay within the public server's usage policy.
pub struct NominatimGeocoder {
    client: reqwest::Client,
    endpoint: String,
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl NominatimGeocoder {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("travel_journal/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            min_interval: Duration::from_millis(NOMINATIM_MIN_INTERVAL_MS),
            last_request: Mutex::new(None),
        })
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    async fn get_text(&self, path: &str, query: &[(&str, String)]) -> Option<String> {
        let url = format!("{}/{}", self.endpoint, path);

        // Held until the response arrives, one request in flight at a time
        let mut last_request = self.last_request.lock().await;
        if let Some(previous) = *last_request {
            sleep_until(previous + self.min_interval).await;
        }
        *last_request = Some(Instant::now());

        let response = match self.client.get(&url).query(query).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Geocoding request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(status = %response.status(), "Geocoding backend returned an error");
            return None;
        }
        response.text().await.ok()
    }
}

#[async_trait]
impl GeoLocationResolver for NominatimGeocoder {
    async fn reverse_geocode(&self, coordinate: Coordinate) -> Option<String> {
        let query = [
            ("format", "jsonv2".to_string()),
            ("lat", coordinate.latitude.to_string()),
            ("lon", coordinate.longitude.to_string()),
            ("zoom", "14".to_string()),
            ("accept-language", "en".to_string()),
        ];
        let body = self.get_text("reverse", &query).await?;
        let label = place_label_from_reverse(&body);
        debug!(%coordinate, ?label, "Reverse geocoded");
        label
    }

    async fn forward_geocode(&self, place_label: &str) -> Option<Coordinate> {
        let query = [
            ("format", "jsonv2".to_string()),
            ("q", place_label.to_string()),
            ("limit", "1".to_string()),
        ];
        let body = self.get_text("search", &query).await?;
        let coordinate = coordinate_from_search(&body);
        debug!(place_label, ?coordinate, "Forward geocoded");
        coordinate
    }
}

/// Nearest-city lookup over the embedded GeoNames table. Works without network;
/// forward geocoding is not supported and always misses.
pub struct OfflineGeocoder {
    geocoder: ReverseGeocoder,
}

impl OfflineGeocoder {
    pub fn new() -> Self {
        Self {
            geocoder: ReverseGeocoder::new(),
        }
    }

    pub fn lookup(&self, coordinate: Coordinate) -> Option<String> {
        if !coordinate.is_valid() {
            return None;
        }
        let search_result = self.geocoder.search((coordinate.latitude, coordinate.longitude));
        let record = search_result.record;
        let country = rust_iso3166::from_alpha2(&record.cc)
            .map(|c| c.name.to_string())
            .unwrap_or_else(|| record.cc.clone());
        format_place_label(Some(&record.name), Some(&country))
    }
}

impl Default for OfflineGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GeoLocationResolver for OfflineGeocoder {
    async fn reverse_geocode(&self, coordinate: Coordinate) -> Option<String> {
        self.lookup(coordinate)
    }

    async fn forward_geocode(&self, _place_label: &str) -> Option<Coordinate> {
        None
    }
}
