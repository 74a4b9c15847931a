//! # exif-stamp
//!
//! Batch metadata stamper: reads capture metadata (EXIF) from every image in a
//! directory tree, stamps a translucent annotation panel with that metadata
//! onto an upright copy of each image, and appends one row per file to an
//! aggregate report (xlsx or txt).
//!
//! ## Quick Start
//!
//! The simplest way to use the library is through [`pipeline::Batch`], which
//! handles the full extract → annotate → report flow:
//!
//! ```rust,no_run
//! use exif_stamp::config::Config;
//! use exif_stamp::pipeline::Batch;
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = Config::load(Some("config.json".as_ref()))?;
//!     let batch = Batch::new(config, Path::new("./IMAGES_IN"))?;
//!
//!     let summary = batch.run();
//!     for failure in &summary.failures {
//!         eprintln!("{}: {}", failure.path.display(), failure.reason);
//!     }
//!     if let Some(ref report) = summary.report {
//!         println!("Report: {}", report.display());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Lower-Level Usage
//!
//! ```rust,no_run
//! use exif_stamp::exif::{NomExifBackend, TagBackend};
//! use exif_stamp::geo::{GpsPrecision, convert};
//! use std::path::Path;
//!
//! fn main() -> anyhow::Result<()> {
//!     let backend = NomExifBackend;
//!     let tags = backend.read_tags(Path::new("photo.jpg"))?;
//!     let metadata = backend.normalize(&tags)?;
//!
//!     let lat = convert(
//!         metadata.gps_latitude.as_ref(),
//!         metadata.gps_lat_ref.unwrap_or('N'),
//!         GpsPrecision::Standard,
//!     );
//!     println!("Latitude: {lat}");
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Formats
//!
//! | Format | Orientation applied |
//! |--------|---------------------|
//! | JPEG (`.jpg`, `.jpeg`) | yes |
//! | PNG (`.png`, `eXIf` chunk) | yes |
//! | HEIC/HEIF (`.heic`, `.heif`, opt-in) | skipped: no decoder, left in place |
//!
//! Annotated copies are always written as PNG.
//!
//! ## Modules
//!
//! - [`config`] — Configuration types and loading/saving
//! - [`exif`] — Tag extraction backends and normalization
//! - [`geo`] — GPS rational to degree/minute/second conversion
//! - [`stamp`] — Orientation correction and the annotation overlay
//! - [`report`] — Aggregate xlsx/txt report
//! - [`pipeline`] — File discovery, per-file processing, quarantine

pub mod config;
pub mod exif;
pub mod geo;
pub mod pipeline;
pub mod report;
pub mod stamp;

#[cfg(test)]
mod test_utils;
