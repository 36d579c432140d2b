use crate::constants::{MAP_MARGIN_DEGREES, SINGLE_PIN_SPAN_DEGREES, WORLD_CENTER, WORLD_SPAN};
use crate::models::{Coordinate, JournalEntry};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapPin {
    pub id: Uuid,
    pub coordinate: Coordinate,
    pub landmark_name: Option<String>,
    pub place_label: Option<String>,
    pub is_favorite: bool,
}

impl MapPin {
    fn from_entry(entry: &JournalEntry) -> Option<Self> {
        Some(Self {
            id: entry.id,
            coordinate: entry.coordinate?,
            landmark_name: entry.landmark_name.clone(),
            place_label: entry.place_label.clone(),
            is_favorite: entry.is_favorite,
        })
    }
}

/// Camera region: a center and the extent in degrees on each axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub center: Coordinate,
    pub latitude_delta: f64,
    pub longitude_delta: f64,
}

impl Region {
    pub fn world() -> Self {
        Self {
            center: Coordinate::new(WORLD_CENTER.0, WORLD_CENTER.1),
            latitude_delta: WORLD_SPAN.0,
            longitude_delta: WORLD_SPAN.1,
        }
    }

    /// World view for no pins, a tight box for one, otherwise the bounding box
    /// of all pins grown by a fixed margin on every side.
    pub fn fitting(pins: &[MapPin]) -> Self {
        match pins {
            [] => Self::world(),
            [only] => Self {
                center: only.coordinate,
                latitude_delta: SINGLE_PIN_SPAN_DEGREES,
                longitude_delta: SINGLE_PIN_SPAN_DEGREES,
            },
            _ => {
                let mut min_lat = f64::MAX;
                let mut max_lat = f64::MIN;
                let mut min_lon = f64::MAX;
                let mut max_lon = f64::MIN;
                for pin in pins {
                    min_lat = min_lat.min(pin.coordinate.latitude);
                    max_lat = max_lat.max(pin.coordinate.latitude);
                    min_lon = min_lon.min(pin.coordinate.longitude);
                    max_lon = max_lon.max(pin.coordinate.longitude);
                }
                min_lat -= MAP_MARGIN_DEGREES;
                max_lat += MAP_MARGIN_DEGREES;
                min_lon -= MAP_MARGIN_DEGREES;
                max_lon += MAP_MARGIN_DEGREES;

                Self {
                    center: Coordinate::new((min_lat + max_lat) / 2.0, (min_lon + max_lon) / 2.0),
                    latitude_delta: max_lat - min_lat,
                    longitude_delta: max_lon - min_lon,
                }
            }
        }
    }
}

/// Pins for every located entry plus the camera position of the first render.
///
/// The initial region is computed once; later refreshes only replace the pins.
#[derive(Debug, Default)]
pub struct MapIndexProjector {
    pins: Vec<MapPin>,
    region: Option<Region>,
}

impl MapIndexProjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh<'a>(&mut self, entries: impl IntoIterator<Item = &'a JournalEntry>) {
        self.pins = entries.into_iter().filter_map(MapPin::from_entry).collect();
    }

    pub fn pins(&self) -> &[MapPin] {
        &self.pins
    }

    pub fn has_set_initial_position(&self) -> bool {
        self.region.is_some()
    }

    pub fn initial_region(&mut self) -> Region {
        *self.region.get_or_insert_with(|| Region::fitting(&self.pins))
    }

    /// True when every pin lies within `tolerance` degrees of the first one on both axes.
    pub fn all_pins_coincident(&self, tolerance: f64) -> bool {
        let Some(first) = self.pins.first() else {
            return true;
        };
        self.pins.iter().all(|pin| {
            (pin.coordinate.latitude - first.coordinate.latitude).abs() <= tolerance
                && (pin.coordinate.longitude - first.coordinate.longitude).abs() <= tolerance
        })
    }
}
