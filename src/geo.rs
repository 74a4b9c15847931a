//! GPS coordinate conversion.
//!
//! EXIF stores latitude and longitude as three unsigned rationals
//! (degrees, minutes, seconds) plus a separate `N`/`S` or `E`/`W` reference.
//! [`convert`] renders them as a degree/minute/second string for overlays and
//! reports.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::exif::TagValue;

/// Returned by [`convert`] when a file carries no coordinate.
pub const GPS_NOT_FOUND: &str = "GPS Data not found";

/// A GPS tag whose shape does not match the rational-triple contract.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeoError {
    #[error("unexpected data type in GPS coordinates: {0}")]
    UnexpectedShape(String),
    #[error("zero denominator in GPS component {0}")]
    ZeroDenominator(String),
}

/// An unsigned EXIF rational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ratio {
    pub num: u32,
    pub den: u32,
}

impl Ratio {
    pub fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn to_f64(self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

/// One of the three coordinate components.
#[derive(Debug, Clone, PartialEq)]
pub enum Component {
    /// A single rational straight from the tag.
    Rational(Ratio),
    /// Already-reduced numeric values; the component is their sum.
    Values(Vec<f64>),
}

impl Component {
    pub fn value(&self) -> f64 {
        match self {
            Component::Rational(r) => r.to_f64(),
            Component::Values(values) => values.iter().sum(),
        }
    }
}

/// Degrees, minutes and seconds of one coordinate.
#[derive(Debug, Clone, PartialEq)]
pub struct RationalTriple {
    pub degrees: Component,
    pub minutes: Component,
    pub seconds: Component,
}

impl RationalTriple {
    pub fn from_values(degrees: f64, minutes: f64, seconds: f64) -> Self {
        Self {
            degrees: Component::Values(vec![degrees]),
            minutes: Component::Values(vec![minutes]),
            seconds: Component::Values(vec![seconds]),
        }
    }

    /// Signed decimal degrees; `S` and `W` references are negative.
    pub fn to_decimal(&self, reference: char) -> f64 {
        let magnitude =
            self.degrees.value() + self.minutes.value() / 60.0 + self.seconds.value() / 3600.0;
        match reference.to_ascii_uppercase() {
            'S' | 'W' => -magnitude,
            _ => magnitude,
        }
    }
}

impl TryFrom<&TagValue> for RationalTriple {
    type Error = GeoError;

    fn try_from(value: &TagValue) -> Result<Self, Self::Error> {
        match value {
            TagValue::Rationals(parts) if parts.len() == 3 => {
                let component = |(num, den): (u32, u32)| {
                    if den == 0 {
                        Err(GeoError::ZeroDenominator(format!("{num}/{den}")))
                    } else {
                        Ok(Component::Rational(Ratio::new(num, den)))
                    }
                };
                Ok(Self {
                    degrees: component(parts[0])?,
                    minutes: component(parts[1])?,
                    seconds: component(parts[2])?,
                })
            }
            TagValue::Text(text) => {
                let numbers = numeric_tokens(text)
                    .ok_or_else(|| GeoError::UnexpectedShape(format!("'{text}'")))?;
                match numbers.as_slice() {
                    [d, m, s] => Ok(Self::from_values(*d, *m, *s)),
                    _ => Err(GeoError::UnexpectedShape(format!(
                        "expected 3 components in '{text}', found {}",
                        numbers.len()
                    ))),
                }
            }
            other => Err(GeoError::UnexpectedShape(format!("{other:?}"))),
        }
    }
}

/// Every number in a printable coordinate such as `40 deg 26' 46.80" N`.
fn numeric_tokens(text: &str) -> Option<Vec<f64>> {
    text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
        .filter(|token| !token.is_empty())
        .map(|token| token.parse::<f64>().ok())
        .collect()
}

/// Decimal places used for the degree, minute and second fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpsPrecision {
    /// `40° 26' 46.80" N`
    #[default]
    Standard,
    /// `40.0° 26.000' 46.8000" N`
    Fine,
}

impl FromStr for GpsPrecision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "fine" => Ok(Self::Fine),
            other => Err(format!("unknown GPS precision '{other}' (expected standard or fine)")),
        }
    }
}

/// Render a coordinate as `D° M' S" REF`.
///
/// `None` yields [`GPS_NOT_FOUND`]. Flipping the reference changes only the
/// trailing character.
///
/// Minutes and seconds are printed as stored in the tag, so `(40, 26, 46.8)`
/// renders as `40° 26' 46.80" N`. Dividing them by 60 and 3600 first (as a
/// decimal-degree formula would) prints `0' 0.01"` for the same tag instead;
/// that scaling belongs to [`RationalTriple::to_decimal`] only.
pub fn convert(coordinates: Option<&RationalTriple>, reference: char, precision: GpsPrecision) -> String {
    let Some(coords) = coordinates else {
        return GPS_NOT_FOUND.to_string();
    };

    let degrees = coords.degrees.value();
    let minutes = coords.minutes.value();
    let seconds = coords.seconds.value();

    match precision {
        GpsPrecision::Standard => {
            format!("{degrees:.0}° {minutes:.0}' {seconds:.2}\" {reference}")
        }
        GpsPrecision::Fine => {
            format!("{degrees:.1}° {minutes:.3}' {seconds:.4}\" {reference}")
        }
    }
}
