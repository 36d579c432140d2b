//! Direct GPS IFD reader for JPEG files whose EXIF structure the regular reader rejects
//! (broken IFD chains written by some editors).

use super::generic::apply_hemisphere;

const GPS_IFD_POINTER: u16 = 0x8825;
const GPS_LATITUDE_REF: u16 = 1;
const GPS_LATITUDE: u16 = 2;
const GPS_LONGITUDE_REF: u16 = 3;
const GPS_LONGITUDE: u16 = 4;
const FORMAT_ASCII: u16 = 2;
const FORMAT_RATIONAL: u16 = 5;

#[derive(Debug, Clone, Copy)]
enum ByteOrder {
    LittleEndian,
    BigEndian,
}

/// Reads GPS coordinates straight from the APP1 segment, bypassing the IFD chain.
/// All four GPS sub-fields (both values and both references) are required.
pub fn extract_gps_from_malformed_exif(data: &[u8]) -> Option<(f64, f64)> {
    let exif_start = find_exif_segment(data)?;

    // APP1: FF E1 [2 bytes length] "Exif\0\0" [TIFF data]
    let tiff_start = exif_start + 4 + 6;
    if tiff_start + 8 > data.len() {
        return None;
    }

    let byte_order = match &data[tiff_start..tiff_start + 2] {
        b"II" => ByteOrder::LittleEndian,
        b"MM" => ByteOrder::BigEndian,
        _ => return None,
    };

    if read_u16(data, tiff_start + 2, byte_order)? != 42 {
        return None;
    }

    let ifd0_offset = read_u32(data, tiff_start + 4, byte_order)? as usize;
    let gps_ifd_offset = find_gps_ifd_offset(data, tiff_start, ifd0_offset, byte_order)?;
    parse_gps_ifd(data, tiff_start, gps_ifd_offset, byte_order)
}

fn find_exif_segment(data: &[u8]) -> Option<usize> {
    if data.len() < 4 || &data[0..2] != b"\xFF\xD8" {
        return None;
    }

    let mut pos = 2;
    while pos + 4 < data.len() {
        if data[pos] != 0xFF {
            return None;
        }

        let marker = data[pos + 1];
        let length = u16::from_be_bytes([data[pos + 2], data[pos + 3]]) as usize;

        if marker == 0xE1 && pos + 10 < data.len() && &data[pos + 4..pos + 10] == b"Exif\0\0" {
            return Some(pos);
        }
        // Start of scan: no metadata segments follow.
        if marker == 0xDA {
            return None;
        }

        pos += 2 + length;
    }

    None
}

fn find_gps_ifd_offset(
    data: &[u8],
    tiff_start: usize,
    ifd_offset: usize,
    byte_order: ByteOrder,
) -> Option<usize> {
    let ifd_pos = tiff_start + ifd_offset;
    let num_entries = read_u16(data, ifd_pos, byte_order)? as usize;
    let mut pos = ifd_pos + 2;

    for _ in 0..num_entries {
        let tag = read_u16(data, pos, byte_order)?;
        if tag == GPS_IFD_POINTER {
            return read_u32(data, pos + 8, byte_order).map(|offset| offset as usize);
        }
        pos += 12;
    }

    None
}

fn parse_gps_ifd(
    data: &[u8],
    tiff_start: usize,
    gps_offset: usize,
    byte_order: ByteOrder,
) -> Option<(f64, f64)> {
    let gps_pos = tiff_start + gps_offset;
    let num_entries = read_u16(data, gps_pos, byte_order)? as usize;
    let mut pos = gps_pos + 2;

    let mut lat = None;
    let mut lat_ref = None;
    let mut lon = None;
    let mut lon_ref = None;

    for _ in 0..num_entries {
        if pos + 12 > data.len() {
            break;
        }

        let tag = read_u16(data, pos, byte_order)?;
        let format = read_u16(data, pos + 2, byte_order)?;
        let count = read_u32(data, pos + 4, byte_order)?;
        let value_offset = read_u32(data, pos + 8, byte_order)? as usize;

        match (tag, format) {
            (GPS_LATITUDE_REF, FORMAT_ASCII) if count >= 1 => lat_ref = Some(data[pos + 8]),
            (GPS_LONGITUDE_REF, FORMAT_ASCII) if count >= 1 => lon_ref = Some(data[pos + 8]),
            (GPS_LATITUDE, FORMAT_RATIONAL) if count == 3 => {
                lat = read_gps_coordinate(data, tiff_start + value_offset, byte_order)
            }
            (GPS_LONGITUDE, FORMAT_RATIONAL) if count == 3 => {
                lon = read_gps_coordinate(data, tiff_start + value_offset, byte_order)
            }
            _ => {}
        }

        pos += 12;
    }

    Some((apply_hemisphere(lat?, lat_ref?), apply_hemisphere(lon?, lon_ref?)))
}

/// Degrees, minutes and seconds stored as three consecutive rationals.
fn read_gps_coordinate(data: &[u8], pos: usize, byte_order: ByteOrder) -> Option<f64> {
    let mut parts = [0.0f64; 3];
    for (i, part) in parts.iter_mut().enumerate() {
        let num = read_u32(data, pos + i * 8, byte_order)? as f64;
        let den = read_u32(data, pos + i * 8 + 4, byte_order)? as f64;
        if den == 0.0 {
            return None;
        }
        *part = num / den;
    }

    Some(parts[0] + parts[1] / 60.0 + parts[2] / 3600.0)
}

fn read_u16(data: &[u8], pos: usize, byte_order: ByteOrder) -> Option<u16> {
    let bytes: [u8; 2] = data.get(pos..pos + 2)?.try_into().ok()?;
    Some(match byte_order {
        ByteOrder::LittleEndian => u16::from_le_bytes(bytes),
        ByteOrder::BigEndian => u16::from_be_bytes(bytes),
    })
}

fn read_u32(data: &[u8], pos: usize, byte_order: ByteOrder) -> Option<u32> {
    let bytes: [u8; 4] = data.get(pos..pos + 4)?.try_into().ok()?;
    Some(match byte_order {
        ByteOrder::LittleEndian => u32::from_le_bytes(bytes),
        ByteOrder::BigEndian => u32::from_be_bytes(bytes),
    })
}
