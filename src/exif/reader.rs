use anyhow::{Context, Result};
use nom_exif::*;
use std::path::Path;

use super::{CanonicalMetadata, RawTags, TagBackend, TagKeys, TagValue, to_exif_date};
use crate::geo::GeoError;

/// Tags read through `Exif::get`, keyed the way exifread groups them.
const ENTRY_KEYS: [(ExifTag, &str); 7] = [
    (ExifTag::Make, "Image Make"),
    (ExifTag::Model, "Image Model"),
    (ExifTag::Orientation, "Image Orientation"),
    (ExifTag::DateTimeOriginal, "EXIF DateTimeOriginal"),
    (ExifTag::OffsetTime, "EXIF OffsetTime"),
    (ExifTag::ExifImageWidth, "EXIF ExifImageWidth"),
    (ExifTag::ExifImageHeight, "EXIF ExifImageLength"),
];

const KEYS: TagKeys = TagKeys {
    gps_latitude: "GPS GPSLatitude",
    gps_lat_ref: "GPS GPSLatitudeRef",
    gps_longitude: "GPS GPSLongitude",
    gps_lon_ref: "GPS GPSLongitudeRef",
    origin_date: "EXIF DateTimeOriginal",
    offset_time: "EXIF OffsetTime",
    orientation: "Image Orientation",
    make: "Image Make",
    model: "Image Model",
    image_width: "EXIF ExifImageWidth",
    image_height: "EXIF ExifImageLength",
    megapixels: "Composite Megapixels",
};

/// In-process EXIF reader built on `nom-exif`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NomExifBackend;

impl TagBackend for NomExifBackend {
    fn name(&self) -> &str {
        "nom-exif"
    }

    fn keys(&self) -> &TagKeys {
        &KEYS
    }

    fn read_tags(&self, path: &Path) -> Result<RawTags> {
        std::fs::File::open(path).context("Failed to open image file")?;

        let mut tags = RawTags::new();
        let mut parser = MediaParser::new();
        let ms = match MediaSource::file_path(path) {
            Ok(ms) => ms,
            Err(e) => {
                log::debug!("No EXIF container recognized in {}: {e}", path.display());
                return Ok(tags);
            }
        };

        let iter: ExifIter = match parser.parse(ms) {
            Ok(iter) => iter,
            Err(_) => {
                log::debug!("No EXIF data found in {}", path.display());
                return Ok(tags);
            }
        };

        // Parse GPS info before converting to Exif (consumes the iterator)
        let gps_info = iter.parse_gps_info().ok().flatten();
        let exif: Exif = iter.into();

        for (tag, key) in ENTRY_KEYS {
            if let Some(val) = exif.get(tag) {
                if let Some(value) = entry_to_value(tag, val) {
                    tags.insert(key.to_string(), value);
                }
            }
        }

        if let Some(gps) = gps_info {
            tags.insert(KEYS.gps_latitude.to_string(), latlng_to_value(&gps.latitude));
            tags.insert(KEYS.gps_lat_ref.to_string(), TagValue::Text(gps.latitude_ref.to_string()));
            tags.insert(KEYS.gps_longitude.to_string(), latlng_to_value(&gps.longitude));
            tags.insert(KEYS.gps_lon_ref.to_string(), TagValue::Text(gps.longitude_ref.to_string()));
        }

        Ok(tags)
    }

    /// The container carries no megapixel tag, so it is derived from the
    /// pixel dimensions when both are known.
    fn normalize(&self, tags: &RawTags) -> Result<CanonicalMetadata, GeoError> {
        let mut record = super::normalize_tags(tags, &KEYS)?;
        if record.megapixels.is_none() {
            record.megapixels = derived_megapixels(record.image_width, record.image_height);
        }
        Ok(record)
    }
}

/// Megapixels rounded to one decimal, as exiftool reports them.
fn derived_megapixels(width: Option<u32>, height: Option<u32>) -> Option<f64> {
    let (w, h) = (width?, height?);
    let mp = w as f64 * h as f64 / 1_000_000.0;
    Some((mp * 10.0).round() / 10.0)
}

/// Convert an EntryValue into a raw tag value.
fn entry_to_value(tag: ExifTag, val: &EntryValue) -> Option<TagValue> {
    let s = val.to_string();
    let s = s.trim().trim_matches('"').trim();
    if s.is_empty() {
        return None;
    }
    if tag == ExifTag::DateTimeOriginal {
        return Some(TagValue::Text(to_exif_date(s)));
    }
    match s.parse::<i64>() {
        Ok(i) => Some(TagValue::Integer(i)),
        Err(_) => Some(TagValue::Text(s.to_string())),
    }
}

/// A nom-exif LatLng (3 URationals: deg, min, sec) as raw rationals.
fn latlng_to_value(latlng: &LatLng) -> TagValue {
    TagValue::Rationals(vec![
        (latlng.0.0, latlng.0.1),
        (latlng.1.0, latlng.1.1),
        (latlng.2.0, latlng.2.1),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ExifEntry, jpeg_with_exif};
    use tempfile::TempDir;

    #[test]
    fn derived_megapixels_rounding() {
        assert_eq!(derived_megapixels(Some(8192), Some(5464)), Some(44.8));
        assert_eq!(derived_megapixels(Some(4000), None), None);
    }

    #[test]
    fn reads_tags_from_jpeg() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tagged.jpg");
        let bytes = jpeg_with_exif(
            &[
                (0x010F, ExifEntry::Ascii("Canon")),
                (0x0110, ExifEntry::Ascii("EOS R5")),
                (0x0112, ExifEntry::Short(6)),
            ],
            &[(0x9003, ExifEntry::Ascii("2024:04:26 10:15:30"))],
            &[
                (0x0001, ExifEntry::Ascii("N")),
                (0x0002, ExifEntry::Rationals(vec![(40, 1), (26, 1), (468, 10)])),
                (0x0003, ExifEntry::Ascii("W")),
                (0x0004, ExifEntry::Rationals(vec![(73, 1), (59, 1), (0, 1)])),
            ],
        );
        std::fs::write(&path, bytes).unwrap();

        let backend = NomExifBackend;
        let tags = backend.read_tags(&path).unwrap();
        let record = backend.normalize(&tags).unwrap();

        assert_eq!(record.make.as_deref(), Some("Canon"));
        assert_eq!(record.model.as_deref(), Some("EOS R5"));
        assert_eq!(record.orientation, Some(6));
        assert_eq!(record.origin_date.as_deref(), Some("2024-04-26 10:15:30"));
        assert_eq!(record.gps_lat_ref, Some('N'));
        assert_eq!(record.gps_lon_ref, Some('W'));
        let lat = record.gps_latitude.unwrap();
        assert!((lat.to_decimal('N') - 40.446333).abs() < 1e-5);
    }

    #[test]
    fn jpeg_without_exif_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.jpg");
        std::fs::write(&path, jpeg_with_exif(&[], &[], &[])).unwrap();

        let backend = NomExifBackend;
        let tags = backend.read_tags(&path).unwrap_or_default();
        let record = backend.normalize(&tags).unwrap();
        assert!(record.make.is_none());
        assert!(record.gps_latitude.is_none());
    }

    #[test]
    fn missing_file_is_error() {
        let backend = NomExifBackend;
        assert!(backend.read_tags(Path::new("/nonexistent/photo.jpg")).is_err());
    }
}
