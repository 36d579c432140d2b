use anyhow::{Context, Result};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod annotation;
mod constants;
mod database;
mod denylist;
mod exif_parser;
mod geocoding;
mod map_index;
mod models;
mod pipeline;
mod processing;
mod server;
mod settings;
mod utils;

use annotation::{AnnotationProvider, VisionLanguageProvider};
use database::EntryStore;
use denylist::Denylist;
use geocoding::{GeoLocationResolver, NominatimGeocoder, OfflineGeocoder};
use map_index::MapIndexProjector;
use pipeline::{AnnotationPipeline, FixedLocation};
use server::{start_server, state::AppState};
use settings::{GeocoderKind, Settings};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("travel_journal=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_geocoder(settings: &Settings) -> Result<Arc<dyn GeoLocationResolver>> {
    let geocoder: Arc<dyn GeoLocationResolver> = match settings.geocoder {
        GeocoderKind::Nominatim => Arc::new(NominatimGeocoder::new(
            &settings.geocoder_endpoint,
            settings.geocode_timeout(),
        )?),
        GeocoderKind::Offline => Arc::new(OfflineGeocoder::new()),
    };
    info!(geocoder = %settings.geocoder, "Geocoder selected");
    Ok(geocoder)
}

fn build_provider(settings: &Settings) -> Result<Arc<dyn AnnotationProvider>> {
    let api_key = settings.effective_api_key();
    if api_key.is_none() {
        warn!("No inference API key configured, photos will get local scene labels only");
    }
    let provider = VisionLanguageProvider::new(
        &settings.api_endpoint,
        &settings.api_model,
        api_key,
        settings.provider_timeout(),
    )?;
    Ok(Arc::new(provider))
}

fn refresh_map(projector: &Mutex<MapIndexProjector>, store: &EntryStore) {
    match projector.lock() {
        Ok(mut projector) => projector.refresh(&store.all_entries()),
        Err(_) => warn!("Map projector lock poisoned, pins not refreshed"),
    }
}

/// Keeps the map pins and the logged statistics in step with the store.
fn spawn_store_observer(store: EntryStore, projector: Arc<Mutex<MapIndexProjector>>) {
    let mut changes = store.subscribe();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    refresh_map(&projector, &store);
                    let stats = store.statistics();
                    info!(
                        places = stats.places_count,
                        countries = stats.countries_count,
                        favorites = stats.favorites_count,
                        "Journal updated"
                    );
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    info!("Travel Journal v{} starting", env!("CARGO_PKG_VERSION"));

    let mut settings = Settings::load().context("Failed to load settings")?;
    if let Some(folder) = std::env::args().nth(1) {
        settings.update_last_folder(&folder);
        settings.save()?;
    }

    let data_dir = settings.data_dir();
    let store = EntryStore::open(&data_dir)
        .with_context(|| format!("Failed to open journal in {}", data_dir.display()))?;
    info!(entries = store.len(), data_dir = %data_dir.display(), "Journal ready");

    let mut denylist = Denylist::default();
    denylist.extend(&settings.denylist);
    info!(patterns = denylist.patterns().len(), "Denylist ready");

    let pipeline = Arc::new(
        AnnotationPipeline::new(build_provider(&settings)?, build_geocoder(&settings)?, store.clone())
            .with_location_source(Arc::new(FixedLocation(settings.last_known_location)))
            .with_denylist(denylist)
            .with_timeouts(settings.provider_timeout(), settings.geocode_timeout()),
    );

    let projector = Arc::new(Mutex::new(MapIndexProjector::new()));
    refresh_map(&projector, &store);
    spawn_store_observer(store, projector.clone());

    match settings.last_folder.clone() {
        Some(folder) if Path::new(&folder).is_dir() => {
            let pipeline = pipeline.clone();
            let concurrency = settings.import_concurrency;
            tokio::spawn(async move {
                if let Err(e) = processing::import_folder(pipeline, Path::new(&folder), concurrency).await {
                    warn!(error = %e, "Folder import failed");
                }
            });
        }
        Some(folder) => warn!(folder = %folder, "Saved photo folder not found"),
        None => info!("No photo folder configured; pass one as the first argument to import it"),
    }

    start_server(AppState::new(pipeline, projector), settings.port).await
}
