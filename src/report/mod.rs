//! Aggregate per-run report.
//!
//! Every successfully processed file becomes one [`FileRecord`]. At the end of
//! a run the records are appended to `<input-folder>_MD.xlsx` (one row per
//! file) or `<input-folder>_MD.txt` (one block per file). Existing content is
//! never rewritten with different values, so the report grows across runs.

mod text;
mod xlsx;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::exif::{CanonicalMetadata, parse_origin_date};
use crate::geo::{self, GpsPrecision};

pub use xlsx::read_rows;

/// Report column headers, in order.
pub const COLUMNS: [&str; 14] = [
    "Filename",
    "File Path",
    "Origin Date",
    "Offset Time",
    "Orientation",
    "Make",
    "Model",
    "File Size",
    "File Type",
    "GPS Latitude",
    "GPS Longitude",
    "Image Width",
    "Image Height",
    "Megapixels",
];

/// Windows `ERROR_SHARING_VIOLATION`: the file is open in another program.
const SHARING_VIOLATION: i32 = 32;

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error(
        "report {} is locked or read-only; close it in other programs (e.g. Excel) and check its permissions",
        .path.display()
    )]
    Locked {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write report {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to build spreadsheet: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
    #[error("failed to read existing report {}: {reason}", .path.display())]
    Read { path: PathBuf, reason: String },
}

impl ReportError {
    /// Classify an I/O failure on `path`, singling out locked files.
    pub(crate) fn from_io(path: &Path, source: io::Error) -> Self {
        let locked = source.kind() == io::ErrorKind::PermissionDenied
            || (cfg!(windows) && source.raw_os_error() == Some(SHARING_VIOLATION));
        let path = path.to_path_buf();
        if locked {
            ReportError::Locked { path, source }
        } else {
            ReportError::Io { path, source }
        }
    }

    /// Whether retrying after the user closes the file may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReportError::Locked { .. })
    }
}

/// Report serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Xlsx,
    Txt,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Xlsx => "xlsx",
            ReportFormat::Txt => "txt",
        }
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "xlsx" => Ok(Self::Xlsx),
            "txt" | "text" => Ok(Self::Txt),
            other => Err(format!("unsupported report format '{other}' (expected xlsx or txt)")),
        }
    }
}

/// One processed file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub filename: String,
    pub file_path: PathBuf,
    pub file_size_bytes: u64,
    /// Extension with its leading dot, as found on disk (`.jpg`).
    pub file_type: String,
    pub metadata: CanonicalMetadata,
}

impl FileRecord {
    /// Build a record from a file on disk and its metadata.
    pub fn from_file(path: &Path, metadata: CanonicalMetadata) -> io::Result<Self> {
        let file_size_bytes = std::fs::metadata(path)?.len();
        Ok(Self {
            filename: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_path: path.to_path_buf(),
            file_size_bytes,
            file_type: path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default(),
            metadata,
        })
    }

    /// Latitude as a DMS string; the reference defaults to `N`.
    pub fn latitude(&self, precision: GpsPrecision) -> String {
        let m = &self.metadata;
        geo::convert(m.gps_latitude.as_ref(), m.gps_lat_ref.unwrap_or('N'), precision)
    }

    /// Longitude as a DMS string; the reference defaults to `E`.
    pub fn longitude(&self, precision: GpsPrecision) -> String {
        let m = &self.metadata;
        geo::convert(m.gps_longitude.as_ref(), m.gps_lon_ref.unwrap_or('E'), precision)
    }
}

/// A typed report cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Text(s) => write!(f, "{s}"),
            Cell::Int(i) => write!(f, "{i}"),
            Cell::Float(v) => write!(f, "{v}"),
        }
    }
}

impl Cell {
    fn text(value: Option<&str>) -> Self {
        match value {
            Some(s) if !s.is_empty() => Cell::Text(s.to_string()),
            _ => Cell::Empty,
        }
    }
}

/// Settings that shape the persisted report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    pub format: ReportFormat,
    pub gps_precision: GpsPrecision,
    /// First lines of a new text report.
    pub header: String,
}

/// `<output_dir>/<input-folder-basename>_MD.<ext>`.
pub fn report_path(output_dir: &Path, input_dir: &Path, format: ReportFormat) -> PathBuf {
    let base = input_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "images".to_string());
    output_dir.join(format!("{base}_MD.{}", format.extension()))
}

/// Append `records` to the report at `destination`, creating it if needed.
pub fn append(
    records: &[FileRecord],
    destination: &Path,
    options: &ReportOptions,
) -> Result<(), ReportError> {
    if let Some(parent) = destination.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ReportError::from_io(parent, e))?;
    }
    match options.format {
        ReportFormat::Xlsx => xlsx::append(records, destination, options.gps_precision),
        ReportFormat::Txt => text::append(records, destination, options),
    }?;
    log::info!("Report updated: {} ({} new entries)", destination.display(), records.len());
    Ok(())
}

/// One spreadsheet row for `record`, in [`COLUMNS`] order.
pub fn report_row(record: &FileRecord, precision: GpsPrecision) -> Vec<Cell> {
    let m = &record.metadata;
    let gps = |present: bool, rendered: String| {
        if present { Cell::Text(rendered) } else { Cell::Empty }
    };
    vec![
        Cell::Text(record.filename.clone()),
        Cell::Text(record.file_path.display().to_string()),
        Cell::text(m.origin_date.as_deref().map(parse_origin_date).as_deref()),
        Cell::text(m.offset_time.as_deref()),
        m.orientation.map_or(Cell::Empty, |o| Cell::Int(o.into())),
        Cell::text(m.make.as_deref().map(ascii_only).as_deref()),
        Cell::text(m.model.as_deref().map(ascii_only).as_deref()),
        Cell::Text(format_filesize_kb(record.file_size_bytes)),
        Cell::Text(record.file_type.clone()),
        gps(m.gps_latitude.is_some(), record.latitude(precision)),
        gps(m.gps_longitude.is_some(), record.longitude(precision)),
        m.image_width.map_or(Cell::Empty, |w| Cell::Int(w.into())),
        m.image_height.map_or(Cell::Empty, |h| Cell::Int(h.into())),
        m.megapixels.map_or(Cell::Empty, Cell::Float),
    ]
}

/// `123.45 KB`.
pub fn format_filesize_kb(bytes: u64) -> String {
    format!("{:.2} KB", bytes as f64 / 1024.0)
}

/// Drop every non-ASCII character.
pub fn ascii_only(s: &str) -> String {
    s.chars().filter(char::is_ascii).collect()
}
