// Port configuration
pub const DEFAULT_PORT: u16 = 3001;

// Storage layout inside the data directory
pub const ENTRIES_FILE: &str = "journal_entries.json";
pub const PROFILE_FILE: &str = "profile.json";
pub const IMAGES_DIR: &str = "images";

// Remote calls
pub const PROVIDER_TIMEOUT_SECS: u64 = 30;
pub const GEOCODE_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_API_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";
pub const DEFAULT_API_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_GEOCODER_ENDPOINT: &str = "https://nominatim.openstreetmap.org";
// Public Nominatim allows one request per second
pub const NOMINATIM_MIN_INTERVAL_MS: u64 = 1000;
pub const API_KEY_ENV: &str = "TRAVEL_JOURNAL_API_KEY";

// Longest side of the JPEG sent for inference
pub const TRANSPORT_MAX_DIMENSION: u32 = 1600;

// Placeholders for fields the model left out. The location placeholder and the
// generic scene labels are all matched by the denylist.
pub const PLACEHOLDER_LOCATION: &str = "Location not determined";
pub const PLACEHOLDER_CAPTION: &str = "A moment worth remembering";
pub const PLACEHOLDER_DESCRIPTION: &str = "No description available.";
pub const GENERIC_SCENE_LABEL: &str = "Captured Scene";
pub const UNIDENTIFIED_LABEL: &str = "Unidentified";

pub const DEFAULT_DENYLIST: &[&str] = &[
    "unknown",
    "location not determined",
    "api",
    "configured",
    "captured scene",
    "unidentified",
];

// Map camera
pub const MAP_MARGIN_DEGREES: f64 = 0.5;
pub const SINGLE_PIN_SPAN_DEGREES: f64 = 0.05;
pub const WORLD_CENTER: (f64, f64) = (20.0, 0.0);
pub const WORLD_SPAN: (f64, f64) = (140.0, 360.0);
pub const COINCIDENT_TOLERANCE_DEGREES: f64 = 0.001;

// Folder import
pub const DEFAULT_IMPORT_CONCURRENCY: usize = 4;
pub const SUPPORTED_FORMATS: &[&str] = &["jpg", "jpeg", "png", "tiff", "tif", "webp", "heic", "heif"];
