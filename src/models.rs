use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A point on the globe in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Rejects NaN and out-of-range values coming from broken metadata or remote services.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5},{:.5}", self.latitude, self.longitude)
    }
}

/// What the platform photo library already knows about an imported asset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssetHint {
    pub coordinate: Option<Coordinate>,
    pub created_at: Option<DateTime<Utc>>,
    /// Stable identifier of the asset (e.g. its file path), kept on the entry.
    pub source_id: Option<String>,
}

// Persisted record for one journal entry. Image bytes are not part of it:
// they live in the images directory under `image_name` and are read on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub id: Uuid,
    pub image_name: String,
    pub captured_at: DateTime<Utc>,
    #[serde(default)]
    pub coordinate: Option<Coordinate>,
    #[serde(default)]
    pub place_label: Option<String>,
    #[serde(default)]
    pub landmark_name: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub is_favorite: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

impl JournalEntry {
    /// Creates an empty entry with a fresh id; the image name is derived from the id.
    pub fn new(captured_at: DateTime<Utc>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            image_name: format!("{}.jpg", id),
            captured_at,
            coordinate: None,
            place_label: None,
            landmark_name: None,
            caption: None,
            description: None,
            facts: Vec::new(),
            is_favorite: false,
            source_id: None,
        }
    }

    /// Calendar day of capture, truncated to local midnight.
    pub fn calendar_day(&self) -> NaiveDate {
        calendar_day(self.captured_at)
    }

    /// Last comma-separated segment of the place label ("Paris, France" -> "France").
    pub fn country(&self) -> Option<&str> {
        self.place_label
            .as_deref()
            .and_then(|label| label.rsplit(',').next())
            .map(str::trim)
            .filter(|country| !country.is_empty())
    }
}

pub fn calendar_day(timestamp: DateTime<Utc>) -> NaiveDate {
    timestamp.with_timezone(&Local).date_naive()
}

/// Derived counters shown on the profile screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileStatistics {
    pub places_count: usize,
    pub countries_count: usize,
    pub favorites_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub display_name: String,
    #[serde(default)]
    pub home_country: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            display_name: "Traveler".to_string(),
            home_country: None,
            created_at: Utc::now(),
        }
    }
}
