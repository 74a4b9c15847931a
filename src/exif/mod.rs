//! EXIF tag extraction and normalization.
//!
//! Extraction backends produce a [`RawTags`] map whose key names depend on the
//! backend. [`TagBackend::normalize`] folds that map into a single
//! [`CanonicalMetadata`] record, so the rest of the pipeline never branches on
//! backend-specific tag names.
//!
//! Two backends ship with the crate:
//!
//! - [`NomExifBackend`] — in-process reader built on `nom-exif`
//! - [`ExifToolBackend`] — runs `exiftool -j` and parses its JSON output

mod exiftool;
mod reader;

pub use exiftool::{ExifToolBackend, parse_json_output};
pub use reader::NomExifBackend;

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::config::ExtractionConfig;
use crate::geo::{GeoError, RationalTriple};
use crate::pipeline::ProcessError;

/// EXIF capture timestamp format.
const EXIF_DATE_FORMAT: &str = "%Y:%m:%d %H:%M:%S";
/// Canonical timestamp format used in overlays and reports.
const CANONICAL_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Orientation tag values and the printable names exiftool uses for them.
pub const ORIENTATION_LABELS: [(u16, &str); 8] = [
    (1, "Horizontal (normal)"),
    (2, "Mirror horizontal"),
    (3, "Rotate 180"),
    (4, "Mirror vertical"),
    (5, "Mirror horizontal and rotate 270 CW"),
    (6, "Rotate 90 CW"),
    (7, "Mirror horizontal and rotate 90 CW"),
    (8, "Rotate 270 CW"),
];

/// A single raw tag value as reported by an extraction backend.
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Text(String),
    Integer(i64),
    Float(f64),
    /// Unsigned rationals as `(numerator, denominator)` pairs.
    Rationals(Vec<(u32, u32)>),
}

impl TagValue {
    /// Whether the value carries no information (empty or whitespace text).
    pub fn is_blank(&self) -> bool {
        matches!(self, TagValue::Text(s) if s.trim().is_empty())
    }

    /// Trimmed string form, `None` when blank.
    pub fn as_text(&self) -> Option<String> {
        let s = self.to_string();
        let s = s.trim();
        if s.is_empty() { None } else { Some(s.to_string()) }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            TagValue::Integer(i) => u32::try_from(*i).ok(),
            TagValue::Float(f) if *f >= 0.0 && f.fract() == 0.0 => Some(*f as u32),
            TagValue::Text(s) => s.trim().parse().ok(),
            TagValue::Rationals(r) if r.len() == 1 && r[0].1 == 1 => Some(r[0].0),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagValue::Integer(i) => Some(*i as f64),
            TagValue::Float(f) => Some(*f),
            TagValue::Text(s) => s.trim().parse().ok(),
            TagValue::Rationals(r) if r.len() == 1 && r[0].1 != 0 => {
                Some(r[0].0 as f64 / r[0].1 as f64)
            }
            _ => None,
        }
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagValue::Text(s) => write!(f, "{s}"),
            TagValue::Integer(i) => write!(f, "{i}"),
            TagValue::Float(v) => write!(f, "{v}"),
            TagValue::Rationals(values) => {
                let parts: Vec<String> = values
                    .iter()
                    .map(|(n, d)| if *d == 1 { n.to_string() } else { format!("{n}/{d}") })
                    .collect();
                write!(f, "[{}]", parts.join(", "))
            }
        }
    }
}

/// Raw tag map produced by a backend, ordered by key.
pub type RawTags = BTreeMap<String, TagValue>;

/// Normalized capture metadata for one file.
///
/// Every field is independently optional: a missing tag never prevents the
/// other fields from being filled in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CanonicalMetadata {
    pub gps_latitude: Option<RationalTriple>,
    pub gps_longitude: Option<RationalTriple>,
    pub gps_lat_ref: Option<char>,
    pub gps_lon_ref: Option<char>,
    /// `YYYY-MM-DD HH:MM:SS`, or the raw tag text when it could not be parsed.
    pub origin_date: Option<String>,
    pub offset_time: Option<String>,
    pub orientation: Option<u16>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
    pub megapixels: Option<f64>,
}

impl CanonicalMetadata {
    /// True when no tag at all was recovered.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Backend-specific names of the tags that feed [`CanonicalMetadata`].
#[derive(Debug, Clone, Copy)]
pub struct TagKeys {
    pub gps_latitude: &'static str,
    pub gps_lat_ref: &'static str,
    pub gps_longitude: &'static str,
    pub gps_lon_ref: &'static str,
    pub origin_date: &'static str,
    pub offset_time: &'static str,
    pub orientation: &'static str,
    pub make: &'static str,
    pub model: &'static str,
    pub image_width: &'static str,
    pub image_height: &'static str,
    pub megapixels: &'static str,
}

/// A metadata extraction backend.
///
/// Implement this trait to add another tag source. `read_tags` talks to the
/// backend; `normalize` maps the backend's key scheme onto the canonical
/// record and has a default implementation driven by [`TagBackend::keys`].
pub trait TagBackend {
    /// Display name used in logs (e.g. `"nom-exif"`).
    fn name(&self) -> &str;

    /// The key scheme this backend reports tags under.
    fn keys(&self) -> &TagKeys;

    /// Read every tag the backend can see in `path`.
    ///
    /// Fails when the file cannot be read or the backend itself fails. A
    /// readable file without EXIF yields an empty map.
    fn read_tags(&self, path: &Path) -> Result<RawTags>;

    /// Fold raw tags into a canonical record.
    ///
    /// Missing tags are never an error. A GPS tag that is present but is not
    /// a rational triple is reported as [`GeoError`].
    fn normalize(&self, tags: &RawTags) -> Result<CanonicalMetadata, GeoError> {
        normalize_tags(tags, self.keys())
    }

    /// Read and normalize in one step, with failures typed for the pipeline.
    fn extract(&self, path: &Path) -> Result<Extraction, ProcessError> {
        let raw = self.read_tags(path).map_err(|e| ProcessError::Extraction {
            backend: self.name().to_string(),
            reason: format!("{e:#}"),
        })?;
        let metadata = self.normalize(&raw)?;
        Ok(Extraction { raw, metadata })
    }
}

/// Raw tags of one file together with their canonical form.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub raw: RawTags,
    pub metadata: CanonicalMetadata,
}

/// Which extraction backend a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackendKind {
    #[default]
    #[serde(rename = "nom-exif")]
    NomExif,
    #[serde(rename = "exiftool")]
    ExifTool,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nom-exif" | "nom" | "builtin" => Ok(Self::NomExif),
            "exiftool" => Ok(Self::ExifTool),
            other => Err(format!("unknown backend '{other}' (expected nom-exif or exiftool)")),
        }
    }
}

/// Build the configured extraction backend.
pub fn build_backend(config: &ExtractionConfig) -> Box<dyn TagBackend> {
    match config.backend {
        BackendKind::NomExif => Box::new(NomExifBackend),
        BackendKind::ExifTool => Box::new(ExifToolBackend::new(
            config.exiftool_path.clone().into(),
            Duration::from_secs(config.timeout_secs),
        )),
    }
}

/// Shared key-driven normalization used by every backend.
pub fn normalize_tags(tags: &RawTags, keys: &TagKeys) -> Result<CanonicalMetadata, GeoError> {
    let get = |key: &str| tags.get(key).filter(|v| !v.is_blank());
    let text = |key: &str| get(key).and_then(TagValue::as_text);

    let gps_latitude = get(keys.gps_latitude).map(RationalTriple::try_from).transpose()?;
    let gps_longitude = get(keys.gps_longitude).map(RationalTriple::try_from).transpose()?;

    Ok(CanonicalMetadata {
        gps_lat_ref: get(keys.gps_lat_ref)
            .and_then(|v| reference_char(v, ['N', 'S']))
            .or_else(|| get(keys.gps_latitude).and_then(|v| trailing_reference(v, ['N', 'S']))),
        gps_lon_ref: get(keys.gps_lon_ref)
            .and_then(|v| reference_char(v, ['E', 'W']))
            .or_else(|| get(keys.gps_longitude).and_then(|v| trailing_reference(v, ['E', 'W']))),
        gps_latitude,
        gps_longitude,
        origin_date: text(keys.origin_date).map(|raw| parse_origin_date(&raw)),
        offset_time: text(keys.offset_time),
        orientation: get(keys.orientation).and_then(parse_orientation),
        make: text(keys.make),
        model: text(keys.model),
        image_width: get(keys.image_width).and_then(TagValue::as_u32),
        image_height: get(keys.image_height).and_then(TagValue::as_u32),
        megapixels: get(keys.megapixels).and_then(TagValue::as_f64),
    })
}

/// Convert an EXIF timestamp (`YYYY:MM:DD HH:MM:SS`) to `YYYY-MM-DD HH:MM:SS`.
///
/// Anything that does not parse is returned unchanged.
pub fn parse_origin_date(raw: &str) -> String {
    match NaiveDateTime::parse_from_str(raw.trim(), EXIF_DATE_FORMAT) {
        Ok(dt) => dt.format(CANONICAL_DATE_FORMAT).to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Rewrite a typed timestamp rendering (RFC 3339, ISO-like) in EXIF form so
/// that [`parse_origin_date`] sees the same input whatever the backend.
pub(crate) fn to_exif_date(value: &str) -> String {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return dt.naive_local().format(EXIF_DATE_FORMAT).to_string();
    }
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S %:z") {
        return dt.naive_local().format(EXIF_DATE_FORMAT).to_string();
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return dt.format(EXIF_DATE_FORMAT).to_string();
        }
    }
    value.to_string()
}

/// Orientation from a numeric tag or its printable name.
fn parse_orientation(value: &TagValue) -> Option<u16> {
    if let Some(n) = value.as_u32() {
        return u16::try_from(n).ok();
    }
    let text = value.as_text()?;
    ORIENTATION_LABELS
        .iter()
        .find(|(_, label)| label.eq_ignore_ascii_case(&text))
        .map(|(n, _)| *n)
}

/// Printable name for an orientation value.
pub fn orientation_label(orientation: u16) -> Option<&'static str> {
    ORIENTATION_LABELS
        .iter()
        .find(|(n, _)| *n == orientation)
        .map(|(_, label)| *label)
}

/// `N`, `North`, `s`, ... → the reference char, if it is one of `allowed`.
fn reference_char(value: &TagValue, allowed: [char; 2]) -> Option<char> {
    let first = value.as_text()?.chars().next()?.to_ascii_uppercase();
    allowed.contains(&first).then_some(first)
}

/// Reference letter at the end of a printable coordinate (`... 46.80" N`).
fn trailing_reference(value: &TagValue, allowed: [char; 2]) -> Option<char> {
    match value {
        TagValue::Text(s) => {
            let last = s.trim().chars().last()?.to_ascii_uppercase();
            allowed.contains(&last).then_some(last)
        }
        _ => None,
    }
}
