use crate::constants::{
    API_KEY_ENV, DEFAULT_API_ENDPOINT, DEFAULT_API_MODEL, DEFAULT_GEOCODER_ENDPOINT,
    DEFAULT_IMPORT_CONCURRENCY, DEFAULT_PORT, GEOCODE_TIMEOUT_SECS, PROVIDER_TIMEOUT_SECS,
};
use crate::models::Coordinate;
use crate::utils::{ensure_directory_exists, get_app_data_dir, get_config_path};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GeocoderKind {
    #[default]
    Nominatim,
    Offline,
}

impl FromStr for GeocoderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "nominatim" => Ok(GeocoderKind::Nominatim),
            "offline" => Ok(GeocoderKind::Offline),
            other => anyhow::bail!("unknown geocoder \"{}\"", other),
        }
    }
}

impl fmt::Display for GeocoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeocoderKind::Nominatim => write!(f, "nominatim"),
            GeocoderKind::Offline => write!(f, "offline"),
        }
    }
}

/// Application settings, stored as `key = value` lines in `travel_journal.ini`.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub port: u16,
    pub data_dir: Option<String>,
    pub last_folder: Option<String>,
    pub api_endpoint: String,
    pub api_model: String,
    pub api_key: Option<String>,
    pub geocoder: GeocoderKind,
    pub geocoder_endpoint: String,
    pub geocode_timeout_secs: u64,
    pub provider_timeout_secs: u64,
    pub import_concurrency: usize,
    pub last_known_location: Option<Coordinate>,
    /// Extra placeholder patterns on top of the built-in denylist.
    pub denylist: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: None,
            last_folder: None,
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            api_model: DEFAULT_API_MODEL.to_string(),
            api_key: None,
            geocoder: GeocoderKind::default(),
            geocoder_endpoint: DEFAULT_GEOCODER_ENDPOINT.to_string(),
            geocode_timeout_secs: GEOCODE_TIMEOUT_SECS,
            provider_timeout_secs: PROVIDER_TIMEOUT_SECS,
            import_concurrency: DEFAULT_IMPORT_CONCURRENCY,
            last_known_location: None,
            denylist: Vec::new(),
        }
    }
}

fn parse_coordinate(value: &str) -> Option<Coordinate> {
    let (lat, lon) = value.split_once(',')?;
    let coordinate = Coordinate::new(lat.trim().parse().ok()?, lon.trim().parse().ok()?);
    coordinate.is_valid().then_some(coordinate)
}

fn parse_or_warn<T: FromStr>(key: &str, value: &str, target: &mut T) {
    match value.parse::<T>() {
        Ok(parsed) => *target = parsed,
        Err(_) => warn!(key, value, "Ignoring invalid setting"),
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        Self::load_from(&get_config_path())
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Settings::default());
        }
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        Ok(Self::parse(&content))
    }

    /// Parses `key = value` lines. Unknown keys are ignored, malformed values keep the default.
    pub fn parse(content: &str) -> Self {
        let mut config_map = HashMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') || line.is_empty() {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                config_map.insert(key.trim(), value.trim().trim_matches('"'));
            }
        }

        let mut settings = Settings::default();
        let non_empty = |key: &str| config_map.get(key).filter(|v| !v.is_empty()).map(|v| v.to_string());

        if let Some(port) = config_map.get("port") {
            parse_or_warn("port", port, &mut settings.port);
        }
        settings.data_dir = non_empty("data_dir");
        settings.last_folder = non_empty("last_folder");
        if let Some(endpoint) = non_empty("api_endpoint") {
            settings.api_endpoint = endpoint;
        }
        if let Some(model) = non_empty("api_model") {
            settings.api_model = model;
        }
        settings.api_key = non_empty("api_key");
        if let Some(geocoder) = config_map.get("geocoder") {
            parse_or_warn("geocoder", geocoder, &mut settings.geocoder);
        }
        if let Some(endpoint) = non_empty("geocoder_endpoint") {
            settings.geocoder_endpoint = endpoint;
        }
        if let Some(secs) = config_map.get("geocode_timeout_secs") {
            parse_or_warn("geocode_timeout_secs", secs, &mut settings.geocode_timeout_secs);
        }
        if let Some(secs) = config_map.get("provider_timeout_secs") {
            parse_or_warn("provider_timeout_secs", secs, &mut settings.provider_timeout_secs);
        }
        if let Some(n) = config_map.get("import_concurrency") {
            parse_or_warn("import_concurrency", n, &mut settings.import_concurrency);
            settings.import_concurrency = settings.import_concurrency.max(1);
        }
        if let Some(value) = config_map.get("last_known_location") {
            settings.last_known_location = parse_coordinate(value);
            if settings.last_known_location.is_none() && !value.is_empty() {
                warn!(value, "Ignoring invalid last_known_location");
            }
        }
        if let Some(list) = config_map.get("denylist") {
            settings.denylist = list
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }

        settings
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&get_config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            ensure_directory_exists(parent).context("Creating config directory")?;
        }
        std::fs::write(config_path, self.render()).context("Failed to write to config file")?;
        Ok(())
    }

    fn render(&self) -> String {
        let mut content = String::from("# Travel Journal Configuration File\n");
        content.push_str(&format!("port = {}\n", self.port));
        if let Some(ref data_dir) = self.data_dir {
            content.push_str(&format!("data_dir = \"{}\"\n", data_dir));
        }
        if let Some(ref last_folder) = self.last_folder {
            content.push_str(&format!("last_folder = \"{}\"\n", last_folder));
        }
        content.push_str(&format!("api_endpoint = {}\n", self.api_endpoint));
        content.push_str(&format!("api_model = {}\n", self.api_model));
        if let Some(ref api_key) = self.api_key {
            content.push_str(&format!("api_key = {}\n", api_key));
        }
        content.push_str(&format!("geocoder = {}\n", self.geocoder));
        content.push_str(&format!("geocoder_endpoint = {}\n", self.geocoder_endpoint));
        content.push_str(&format!("geocode_timeout_secs = {}\n", self.geocode_timeout_secs));
        content.push_str(&format!("provider_timeout_secs = {}\n", self.provider_timeout_secs));
        content.push_str(&format!("import_concurrency = {}\n", self.import_concurrency));
        if let Some(location) = self.last_known_location {
            content.push_str(&format!("last_known_location = {},{}\n", location.latitude, location.longitude));
        }
        if !self.denylist.is_empty() {
            content.push_str(&format!("denylist = {}\n", self.denylist.join(", ")));
        }
        content
    }

    pub fn update_last_folder<P: AsRef<Path>>(&mut self, folder_path: P) {
        self.last_folder = folder_path.as_ref().to_str().map(|s| s.to_string());
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(get_app_data_dir)
    }

    /// The environment variable wins over the config file.
    pub fn effective_api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .or_else(|| self.api_key.clone())
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn geocode_timeout(&self) -> Duration {
        Duration::from_secs(self.geocode_timeout_secs)
    }
}
