pub mod container;
pub mod generic;
pub mod gps_parser;

pub use container::{extract_capture_time, extract_coordinate, read_exif};
pub use generic::apply_exif_orientation;

#[cfg(test)]
pub(crate) mod test_support {
    use exif::experimental::Writer;
    use exif::{Field, In, Rational, Tag, Value};
    use std::io::Cursor;

    fn dms(d: u32, m: u32, s: u32) -> Value {
        Value::Rational(vec![
            Rational { num: d, denom: 1 },
            Rational { num: m, denom: 1 },
            Rational { num: s, denom: 1 },
        ])
    }

    fn ascii(text: &[u8]) -> Value {
        Value::Ascii(vec![text.to_vec()])
    }

    fn write_tiff(fields: &[Field]) -> Vec<u8> {
        let mut writer = Writer::new();
        for field in fields {
            writer.push_field(field);
        }
        let mut buf = Cursor::new(Vec::new());
        writer.write(&mut buf, false).expect("EXIF fixture should serialize");
        buf.into_inner()
    }

    fn field(tag: Tag, value: Value) -> Field {
        Field { tag, ifd_num: In::PRIMARY, value }
    }

    /// TIFF bytes holding 33°51'24" / 151°12'55" with the given hemisphere references.
    pub fn gps_tiff(lat_ref: Option<&[u8]>, lon_ref: Option<&[u8]>) -> Vec<u8> {
        let mut fields = vec![
            field(Tag::Make, ascii(b"Fixture")),
            field(Tag::GPSLatitude, dms(33, 51, 24)),
            field(Tag::GPSLongitude, dms(151, 12, 55)),
        ];
        if let Some(r) = lat_ref {
            fields.push(field(Tag::GPSLatitudeRef, ascii(r)));
        }
        if let Some(r) = lon_ref {
            fields.push(field(Tag::GPSLongitudeRef, ascii(r)));
        }
        write_tiff(&fields)
    }

    pub fn gps_tiff_with_datetime(datetime: &[u8]) -> Vec<u8> {
        write_tiff(&[
            field(Tag::Make, ascii(b"Fixture")),
            field(Tag::DateTime, ascii(datetime)),
        ])
    }

    /// Minimal JPEG: SOI, APP1 carrying the TIFF payload, EOI.
    pub fn wrap_in_jpeg(tiff: &[u8]) -> Vec<u8> {
        let length = (2 + 6 + tiff.len()) as u16;
        let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
        jpeg.extend_from_slice(&length.to_be_bytes());
        jpeg.extend_from_slice(b"Exif\0\0");
        jpeg.extend_from_slice(tiff);
        jpeg.extend_from_slice(&[0xFF, 0xD9]);
        jpeg
    }
}
