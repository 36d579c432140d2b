use super::generic::{get_datetime_from_exif, get_gps_coord};
use super::gps_parser;
use crate::models::Coordinate;
use chrono::NaiveDateTime;
use exif::Tag;
use std::io::Cursor;
use tracing::debug;

/// Parses EXIF from any container the reader understands (JPEG, HEIF, PNG, TIFF, WebP).
/// Partial results are kept so GPS tags parsed before a broken IFD are not lost.
pub fn read_exif(image: &[u8]) -> Option<exif::Exif> {
    let mut exif_reader = exif::Reader::new();
    exif_reader.continue_on_error(true);

    match exif_reader.read_from_container(&mut Cursor::new(image)) {
        Ok(exif) => Some(exif),
        Err(exif::Error::PartialResult(partial)) => {
            let (exif, errors) = partial.into_inner();
            debug!(errors = errors.len(), "EXIF parsed with errors, using partial result");
            Some(exif)
        }
        Err(e) => {
            debug!(error = %e, "No readable EXIF in image");
            None
        }
    }
}

/// Embedded GPS position of the image, or `None` when any of the latitude,
/// longitude or hemisphere reference fields is missing. Never fails.
pub fn extract_coordinate(image: &[u8]) -> Option<Coordinate> {
    let from_reader = read_exif(image).and_then(|exif| {
        match (
            get_gps_coord(&exif, Tag::GPSLatitude, Tag::GPSLatitudeRef),
            get_gps_coord(&exif, Tag::GPSLongitude, Tag::GPSLongitudeRef),
        ) {
            (Some(lat), Some(lng)) => Some(Coordinate::new(lat, lng)),
            _ => None,
        }
    });

    // Fallback to the raw GPS IFD walk for malformed files (e.g. Lightroom exports)
    let coordinate = from_reader.or_else(|| {
        gps_parser::extract_gps_from_malformed_exif(image).map(|(lat, lng)| Coordinate::new(lat, lng))
    })?;

    if coordinate.is_valid() {
        Some(coordinate)
    } else {
        debug!(%coordinate, "Discarding out-of-range EXIF coordinate");
        None
    }
}

/// Local wall-clock capture time recorded by the camera.
pub fn extract_capture_time(image: &[u8]) -> Option<NaiveDateTime> {
    read_exif(image).and_then(|exif| get_datetime_from_exif(&exif))
}
