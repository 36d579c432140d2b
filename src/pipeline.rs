use crate::annotation::{Annotation, AnnotationProvider, LocalSceneClassifier};
use crate::constants::{
    GEOCODE_TIMEOUT_SECS, PLACEHOLDER_CAPTION, PLACEHOLDER_DESCRIPTION, PROVIDER_TIMEOUT_SECS,
    UNIDENTIFIED_LABEL,
};
use crate::database::EntryStore;
use crate::denylist::{Denylist, DiscardReason};
use crate::exif_parser::{extract_capture_time, extract_coordinate};
use crate::geocoding::GeoLocationResolver;
use crate::models::{AssetHint, Coordinate, JournalEntry};
use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Source of the device's last known position, used when nothing else places a photo.
pub trait LocationSource: Send + Sync {
    fn last_known_location(&self) -> Option<Coordinate>;
}

/// A position fixed at construction, typically from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedLocation(pub Option<Coordinate>);

impl LocationSource for FixedLocation {
    fn last_known_location(&self) -> Option<Coordinate> {
        self.0.filter(Coordinate::is_valid)
    }
}

/// Outcome of running a photo through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Saved(JournalEntry),
    Discarded(DiscardReason),
}

/// Turns photo bytes into a located, annotated journal entry.
///
/// Coordinate precedence is asset hint, then embedded GPS, then a forward lookup of the
/// provider's place label, then the last known location. Only persistence errors reach
/// the caller; every other failure degrades to the next source.
pub struct AnnotationPipeline {
    provider: Arc<dyn AnnotationProvider>,
    fallback: Arc<dyn AnnotationProvider>,
    geocoder: Arc<dyn GeoLocationResolver>,
    location_source: Arc<dyn LocationSource>,
    denylist: Denylist,
    store: EntryStore,
    provider_timeout: Duration,
    geocode_timeout: Duration,
}

impl AnnotationPipeline {
    pub fn new(
        provider: Arc<dyn AnnotationProvider>,
        geocoder: Arc<dyn GeoLocationResolver>,
        store: EntryStore,
    ) -> Self {
        Self {
            provider,
            fallback: Arc::new(LocalSceneClassifier),
            geocoder,
            location_source: Arc::new(FixedLocation(None)),
            denylist: Denylist::default(),
            store,
            provider_timeout: Duration::from_secs(PROVIDER_TIMEOUT_SECS),
            geocode_timeout: Duration::from_secs(GEOCODE_TIMEOUT_SECS),
        }
    }

    pub fn with_location_source(mut self, source: Arc<dyn LocationSource>) -> Self {
        self.location_source = source;
        self
    }

    pub fn with_denylist(mut self, denylist: Denylist) -> Self {
        self.denylist = denylist;
        self
    }

    pub fn with_timeouts(mut self, provider: Duration, geocode: Duration) -> Self {
        self.provider_timeout = provider;
        self.geocode_timeout = geocode;
        self
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    /// Resolves a photo and saves it unless the result is non-informative.
    pub async fn resolve(&self, image: Vec<u8>, hint: Option<AssetHint>) -> Result<Resolution> {
        let entry = self.annotate(&image, hint.as_ref()).await;

        if let Some(reason) = self.denylist.rejects(&entry) {
            info!(
                landmark = ?entry.landmark_name,
                place = ?entry.place_label,
                %reason,
                "Discarding non-informative entry"
            );
            return Ok(Resolution::Discarded(reason));
        }

        let store = self.store.clone();
        let saved = entry.clone();
        tokio::task::spawn_blocking(move || store.save(saved, &image))
            .await
            .context("Save task panicked")??;

        info!(
            id = %entry.id,
            landmark = ?entry.landmark_name,
            place = ?entry.place_label,
            coordinate = ?entry.coordinate,
            "Journal entry saved"
        );
        Ok(Resolution::Saved(entry))
    }

    /// Builds the candidate entry without validating or persisting it.
    pub async fn annotate(&self, image: &[u8], hint: Option<&AssetHint>) -> JournalEntry {
        let mut coordinate = match hint.and_then(|h| h.coordinate).filter(Coordinate::is_valid) {
            Some(c) => {
                debug!(%c, "Using asset location");
                Some(c)
            }
            None => {
                let c = extract_coordinate(image);
                if let Some(c) = c {
                    debug!(%c, "Using embedded GPS location");
                }
                c
            }
        };

        let mut place_label = match coordinate {
            Some(c) => self.reverse_geocode(c).await,
            None => None,
        };

        let (annotation, from_provider) = match self.call_provider(image, place_label.as_deref()).await {
            Some(annotation) => (annotation, true),
            None => (self.call_fallback(image, place_label.as_deref()).await, false),
        };

        // A label we already had is authoritative over whatever the model said
        if place_label.is_none() {
            place_label = annotation.place_label.clone();
        }

        if coordinate.is_none() && from_provider {
            if let Some(label) = place_label.as_deref() {
                if self.denylist.matching_pattern(label).is_none() {
                    coordinate = self.forward_geocode(label).await;
                }
            }
        }

        if coordinate.is_none() {
            if let Some(last_known) = self.location_source.last_known_location() {
                debug!(%last_known, "Falling back to last known location");
                coordinate = Some(last_known);
                let placeholder = place_label
                    .as_deref()
                    .map_or(true, |label| self.denylist.matching_pattern(label).is_some());
                if placeholder {
                    if let Some(label) = self.reverse_geocode(last_known).await {
                        place_label = Some(label);
                    }
                }
            }
        }

        let mut entry = JournalEntry::new(capture_time(image, hint));
        entry.coordinate = coordinate;
        entry.place_label = place_label;
        entry.landmark_name = Some(annotation.landmark_name);
        entry.caption = Some(annotation.caption);
        entry.description = Some(annotation.description);
        entry.facts = annotation.facts;
        entry.source_id = hint.and_then(|h| h.source_id.clone());
        entry
    }

    async fn call_provider(&self, image: &[u8], place_hint: Option<&str>) -> Option<Annotation> {
        match timeout(self.provider_timeout, self.provider.annotate(image, place_hint)).await {
            Ok(Ok(annotation)) => Some(annotation),
            Ok(Err(e)) => {
                warn!(provider = self.provider.name(), error = %e, "Annotation failed, using local fallback");
                None
            }
            Err(_) => {
                warn!(
                    provider = self.provider.name(),
                    timeout = ?self.provider_timeout,
                    "Annotation timed out, using local fallback"
                );
                None
            }
        }
    }

    async fn call_fallback(&self, image: &[u8], place_hint: Option<&str>) -> Annotation {
        match self.fallback.annotate(image, place_hint).await {
            Ok(annotation) => annotation,
            Err(e) => {
                warn!(provider = self.fallback.name(), error = %e, "Local fallback failed");
                Annotation {
                    landmark_name: UNIDENTIFIED_LABEL.to_string(),
                    place_label: place_hint.map(str::to_string),
                    caption: PLACEHOLDER_CAPTION.to_string(),
                    description: PLACEHOLDER_DESCRIPTION.to_string(),
                    facts: Vec::new(),
                }
            }
        }
    }

    async fn reverse_geocode(&self, coordinate: Coordinate) -> Option<String> {
        match timeout(self.geocode_timeout, self.geocoder.reverse_geocode(coordinate)).await {
            Ok(label) => label,
            Err(_) => {
                warn!(%coordinate, "Reverse geocoding timed out");
                None
            }
        }
    }

    async fn forward_geocode(&self, place_label: &str) -> Option<Coordinate> {
        match timeout(self.geocode_timeout, self.geocoder.forward_geocode(place_label)).await {
            Ok(coordinate) => coordinate.filter(Coordinate::is_valid),
            Err(_) => {
                warn!(place_label, "Forward geocoding timed out");
                None
            }
        }
    }
}

/// Asset creation date, then EXIF capture time (camera local time), then now.
fn capture_time(image: &[u8], hint: Option<&AssetHint>) -> DateTime<Utc> {
    if let Some(created_at) = hint.and_then(|h| h.created_at) {
        return created_at;
    }
    extract_capture_time(image)
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::response::parse_annotation;
    use crate::annotation::AnnotationError;
    use crate::exif_parser::test_support::{gps_tiff, gps_tiff_with_datetime, wrap_in_jpeg};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    struct FakeProvider {
        reply: Option<Annotation>,
        hints: Mutex<Vec<Option<String>>>,
    }

    impl FakeProvider {
        fn answering(landmark: &str, place: Option<&str>) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(Annotation {
                    landmark_name: landmark.to_string(),
                    place_label: place.map(str::to_string),
                    caption: "A caption".to_string(),
                    description: "A description.".to_string(),
                    facts: vec!["One fact.".to_string()],
                }),
                hints: Mutex::new(Vec::new()),
            })
        }

        fn replying(annotation: Annotation) -> Arc<Self> {
            Arc::new(Self {
                reply: Some(annotation),
                hints: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: None,
                hints: Mutex::new(Vec::new()),
            })
        }

        fn hints(&self) -> Vec<Option<String>> {
            self.hints.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AnnotationProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn annotate(
            &self,
            _image: &[u8],
            place_hint: Option<&str>,
        ) -> Result<Annotation, AnnotationError> {
            self.hints.lock().unwrap().push(place_hint.map(str::to_string));
            self.reply
                .clone()
                .ok_or_else(|| AnnotationError::Transport("connection refused".to_string()))
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl AnnotationProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }

        async fn annotate(&self, _image: &[u8], _hint: Option<&str>) -> Result<Annotation, AnnotationError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(AnnotationError::Transport("unreachable".to_string()))
        }
    }

    #[derive(Default)]
    struct FakeGeocoder {
        reverse: Option<String>,
        forward: Option<Coordinate>,
        reverse_calls: Mutex<Vec<Coordinate>>,
        forward_calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GeoLocationResolver for FakeGeocoder {
        async fn reverse_geocode(&self, coordinate: Coordinate) -> Option<String> {
            self.reverse_calls.lock().unwrap().push(coordinate);
            self.reverse.clone()
        }

        async fn forward_geocode(&self, place_label: &str) -> Option<Coordinate> {
            self.forward_calls.lock().unwrap().push(place_label.to_string());
            self.forward
        }
    }

    struct HangingGeocoder;

    #[async_trait]
    impl GeoLocationResolver for HangingGeocoder {
        async fn reverse_geocode(&self, _coordinate: Coordinate) -> Option<String> {
            std::future::pending().await
        }

        async fn forward_geocode(&self, _place_label: &str) -> Option<Coordinate> {
            std::future::pending().await
        }
    }

    fn pipeline(
        provider: Arc<dyn AnnotationProvider>,
        geocoder: Arc<dyn GeoLocationResolver>,
    ) -> (AnnotationPipeline, TempDir) {
        let dir = tempdir().unwrap();
        let store = EntryStore::open(dir.path()).unwrap();
        (AnnotationPipeline::new(provider, geocoder, store), dir)
    }

    fn green_png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(32, 32, image::Rgb([40, 120, 50]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        img.write_to(&mut bytes, image::ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    fn sydney_jpeg() -> Vec<u8> {
        wrap_in_jpeg(&gps_tiff(Some(b"S"), Some(b"E")))
    }

    #[tokio::test]
    async fn test_embedded_gps_label_is_echoed() {
        let provider = FakeProvider::answering("Sydney Opera House", Some("Somewhere Else, Nowhere"));
        let geocoder = Arc::new(FakeGeocoder {
            reverse: Some("Sydney, Australia".to_string()),
            ..Default::default()
        });
        let (pipeline, _dir) = pipeline(provider.clone(), geocoder.clone());

        let resolution = pipeline.resolve(sydney_jpeg(), None).await.unwrap();

        let Resolution::Saved(entry) = resolution else {
            panic!("entry should be saved");
        };
        assert_eq!(entry.place_label.as_deref(), Some("Sydney, Australia"));
        assert_eq!(provider.hints(), vec![Some("Sydney, Australia".to_string())]);

        let coordinate = entry.coordinate.unwrap();
        assert!((coordinate.latitude + 33.856666).abs() < 1e-4);
        assert!((coordinate.longitude - 151.215277).abs() < 1e-4);
        assert!(geocoder.forward_calls.lock().unwrap().is_empty());
        assert_eq!(pipeline.store().get(entry.id), Some(entry));
    }

    #[tokio::test]
    async fn test_asset_hint_takes_precedence_over_exif() {
        let provider = FakeProvider::answering("Colosseum", None);
        let geocoder = Arc::new(FakeGeocoder {
            reverse: Some("Rome, Italy".to_string()),
            ..Default::default()
        });
        let (pipeline, _dir) = pipeline(provider, geocoder.clone());
        let created_at = Utc.with_ymd_and_hms(2023, 9, 1, 8, 0, 0).unwrap();
        let hint = AssetHint {
            coordinate: Some(Coordinate::new(41.8902, 12.4922)),
            created_at: Some(created_at),
            source_id: Some("/trips/rome/IMG_0042.jpg".to_string()),
        };

        let entry = pipeline.annotate(&sydney_jpeg(), Some(&hint)).await;

        assert_eq!(entry.coordinate, Some(Coordinate::new(41.8902, 12.4922)));
        assert_eq!(entry.captured_at, created_at);
        assert_eq!(entry.source_id.as_deref(), Some("/trips/rome/IMG_0042.jpg"));
        assert_eq!(
            *geocoder.reverse_calls.lock().unwrap(),
            vec![Coordinate::new(41.8902, 12.4922)]
        );
    }

    #[tokio::test]
    async fn test_forward_geocodes_provider_label_without_coordinate() {
        let provider = FakeProvider::answering("Eiffel Tower", Some("Paris, France"));
        let geocoder = Arc::new(FakeGeocoder {
            forward: Some(Coordinate::new(48.8584, 2.2945)),
            ..Default::default()
        });
        let (pipeline, _dir) = pipeline(provider.clone(), geocoder.clone());

        let entry = pipeline.annotate(&green_png(), None).await;

        assert_eq!(provider.hints(), vec![None]);
        assert_eq!(entry.place_label.as_deref(), Some("Paris, France"));
        assert_eq!(entry.coordinate, Some(Coordinate::new(48.8584, 2.2945)));
        assert_eq!(*geocoder.forward_calls.lock().unwrap(), vec!["Paris, France".to_string()]);
        assert!(geocoder.reverse_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_placeholder_label_is_not_forward_geocoded() {
        let provider = FakeProvider::answering("Old Bridge", Some("Location not determined"));
        let geocoder = Arc::new(FakeGeocoder::default());
        let (pipeline, _dir) = pipeline(provider, geocoder.clone());

        let resolution = pipeline.resolve(green_png(), None).await.unwrap();

        assert!(matches!(resolution, Resolution::Discarded(_)));
        assert!(geocoder.forward_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_known_location_is_last_resort() {
        let provider = FakeProvider::answering("Harbour Market", None);
        let geocoder = Arc::new(FakeGeocoder {
            reverse: Some("Bergen, Norway".to_string()),
            ..Default::default()
        });
        let (pipeline, _dir) = pipeline(provider, geocoder.clone());
        let pipeline = pipeline
            .with_location_source(Arc::new(FixedLocation(Some(Coordinate::new(60.3913, 5.3221)))));

        let entry = pipeline.annotate(&green_png(), None).await;

        assert_eq!(entry.coordinate, Some(Coordinate::new(60.3913, 5.3221)));
        assert_eq!(entry.place_label.as_deref(), Some("Bergen, Norway"));
    }

    #[tokio::test]
    async fn test_last_known_location_replaces_placeholder_label() {
        let annotation = parse_annotation(r#"{"locationName": "Bryggen Wharf"}"#, None).unwrap();
        let provider = FakeProvider::replying(annotation);
        let geocoder = Arc::new(FakeGeocoder {
            reverse: Some("Bergen, Norway".to_string()),
            ..Default::default()
        });
        let (pipeline, _dir) = pipeline(provider, geocoder.clone());
        let pipeline = pipeline
            .with_location_source(Arc::new(FixedLocation(Some(Coordinate::new(60.39, 5.32)))));

        let resolution = pipeline.resolve(green_png(), None).await.unwrap();

        let Resolution::Saved(entry) = resolution else {
            panic!("entry with a real landmark and position should be saved");
        };
        assert_eq!(entry.coordinate, Some(Coordinate::new(60.39, 5.32)));
        assert_eq!(entry.place_label.as_deref(), Some("Bergen, Norway"));
        assert_eq!(entry.landmark_name.as_deref(), Some("Bryggen Wharf"));
        assert!(geocoder.forward_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_last_known_location_keeps_real_provider_label() {
        let provider = FakeProvider::answering("Harbour Market", Some("Stavanger, Norway"));
        let geocoder = Arc::new(FakeGeocoder {
            reverse: Some("Bergen, Norway".to_string()),
            ..Default::default()
        });
        let (pipeline, _dir) = pipeline(provider, geocoder.clone());
        let pipeline = pipeline
            .with_location_source(Arc::new(FixedLocation(Some(Coordinate::new(60.39, 5.32)))));

        let entry = pipeline.annotate(&green_png(), None).await;

        assert_eq!(entry.coordinate, Some(Coordinate::new(60.39, 5.32)));
        assert_eq!(entry.place_label.as_deref(), Some("Stavanger, Norway"));
        assert!(geocoder.reverse_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hanging_geocoder_counts_as_no_result() {
        let timeouts = (Duration::from_secs(5), Duration::from_millis(50));

        // Reverse lookup of the embedded GPS position never answers
        let provider = FakeProvider::answering("Sydney Opera House", None);
        let (located, _dir) = pipeline(provider.clone(), Arc::new(HangingGeocoder));
        let located = located.with_timeouts(timeouts.0, timeouts.1);

        let entry = located.annotate(&sydney_jpeg(), None).await;
        assert!(entry.coordinate.is_some());
        assert_eq!(entry.place_label, None);
        assert_eq!(provider.hints(), vec![None]);

        // Forward lookup of the model's label never answers either
        let provider = FakeProvider::answering("Eiffel Tower", Some("Paris, France"));
        let (unlocated, _other_dir) = pipeline(provider, Arc::new(HangingGeocoder));
        let unlocated = unlocated.with_timeouts(timeouts.0, timeouts.1);

        let entry = unlocated.annotate(&green_png(), None).await;
        assert_eq!(entry.coordinate, None);
        assert_eq!(entry.place_label.as_deref(), Some("Paris, France"));
    }

    #[tokio::test]
    async fn test_provider_failure_uses_local_fallback() {
        let provider = FakeProvider::failing();
        let geocoder = Arc::new(FakeGeocoder {
            forward: Some(Coordinate::new(1.0, 1.0)),
            ..Default::default()
        });
        let (pipeline, _dir) = pipeline(provider, geocoder.clone());

        let resolution = pipeline.resolve(green_png(), None).await.unwrap();

        let Resolution::Saved(entry) = resolution else {
            panic!("fallback entry should be saved");
        };
        assert_eq!(entry.landmark_name.as_deref(), Some("Forest"));
        assert_eq!(entry.coordinate, None);
        assert!(entry.facts.is_empty());
        assert!(geocoder.forward_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_provider_failure_keeps_embedded_coordinate() {
        let geocoder = Arc::new(FakeGeocoder {
            reverse: Some("Sydney, Australia".to_string()),
            ..Default::default()
        });
        let (pipeline, _dir) = pipeline(FakeProvider::failing(), geocoder);

        let entry = pipeline.annotate(&sydney_jpeg(), None).await;

        assert!(entry.coordinate.is_some());
        assert_eq!(entry.place_label.as_deref(), Some("Sydney, Australia"));
        assert!(entry.landmark_name.is_some());
    }

    #[tokio::test]
    async fn test_provider_timeout_uses_local_fallback() {
        let (pipeline, _dir) = pipeline(Arc::new(SlowProvider), Arc::new(FakeGeocoder::default()));
        let pipeline = pipeline.with_timeouts(Duration::from_millis(50), Duration::from_millis(50));

        let entry = pipeline.annotate(&green_png(), None).await;

        assert_eq!(entry.landmark_name.as_deref(), Some("Forest"));
    }

    #[tokio::test]
    async fn test_denylisted_landmark_is_never_saved() {
        let provider = FakeProvider::answering("Captured Scene", Some("Paris, France"));
        let (pipeline, _dir) = pipeline(provider, Arc::new(FakeGeocoder::default()));
        let mut events = pipeline.store().subscribe();

        let resolution = pipeline.resolve(green_png(), None).await.unwrap();

        assert!(matches!(
            resolution,
            Resolution::Discarded(DiscardReason::Placeholder { field: "landmark name", .. })
        ));
        assert!(pipeline.store().is_empty());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_capture_time_from_exif() {
        let provider = FakeProvider::answering("Tower Bridge", None);
        let (pipeline, _dir) = pipeline(provider, Arc::new(FakeGeocoder::default()));
        let image = wrap_in_jpeg(&gps_tiff_with_datetime(b"2024:06:01 14:30:05"));

        let entry = pipeline.annotate(&image, None).await;

        let naive = chrono::NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(14, 30, 5)
            .unwrap();
        let expected = Local.from_local_datetime(&naive).earliest().unwrap().with_timezone(&Utc);
        assert_eq!(entry.captured_at, expected);
    }
}
