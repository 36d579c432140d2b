use chrono::NaiveDateTime;
use exif::{In, Tag, Value};

/// Applies the EXIF orientation of the original bytes to a decoded image.
pub fn apply_exif_orientation(exif: Option<&exif::Exif>, img: image::DynamicImage) -> image::DynamicImage {
    let orientation = exif
        .and_then(|exif| exif.get_field(Tag::Orientation, In::PRIMARY))
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1);

    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate270().fliph(),
        6 => img.rotate90(),
        7 => img.rotate90().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Reads one GPS axis (degrees, minutes, seconds) and its hemisphere reference.
///
/// Both the coordinate and the reference tag must be present; a southern latitude
/// or western longitude is negated.
pub fn get_gps_coord(exif: &exif::Exif, coord_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let coord = exif.get_field(coord_tag, In::PRIMARY)?;
    let reference = exif.get_field(ref_tag, In::PRIMARY)?;

    let Value::Rational(ref parts) = coord.value else {
        return None;
    };
    if parts.len() != 3 {
        return None;
    }
    let hemisphere = match reference.value {
        Value::Ascii(ref values) => values.first().and_then(|v| v.first()).copied()?,
        _ => return None,
    };

    let d = parts[0].to_f64();
    let m = parts[1].to_f64();
    let s = parts[2].to_f64();
    let decimal = d + (m / 60.0) + (s / 3600.0);

    Some(apply_hemisphere(decimal, hemisphere))
}

/// South and west references negate the raw magnitude.
pub fn apply_hemisphere(magnitude: f64, hemisphere: u8) -> f64 {
    match hemisphere.to_ascii_uppercase() {
        b'S' | b'W' => -magnitude,
        _ => magnitude,
    }
}

/// Capture time from `DateTimeOriginal`, falling back to `DateTime`.
/// EXIF stores it as local wall-clock time without an offset.
pub fn get_datetime_from_exif(exif: &exif::Exif) -> Option<NaiveDateTime> {
    let try_tags = [Tag::DateTimeOriginal, Tag::DateTime];

    for &tag in &try_tags {
        let Some(field) = exif.get_field(tag, In::PRIMARY) else {
            continue;
        };
        if let Value::Ascii(ref vec) = field.value {
            let parsed = vec
                .first()
                .and_then(|raw| std::str::from_utf8(raw).ok())
                .and_then(|s| NaiveDateTime::parse_from_str(s.trim(), "%Y:%m:%d %H:%M:%S").ok());
            if parsed.is_some() {
                return parsed;
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hemisphere_sign_correction() {
        assert_eq!(apply_hemisphere(33.5, b'S'), -33.5);
        assert_eq!(apply_hemisphere(70.25, b'W'), -70.25);
        assert_eq!(apply_hemisphere(48.85, b'N'), 48.85);
        assert_eq!(apply_hemisphere(2.29, b'E'), 2.29);
        assert_eq!(apply_hemisphere(12.0, b's'), -12.0);
    }
}
