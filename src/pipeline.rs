use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use walkdir::WalkDir;

use crate::config::Config;
use crate::exif::{self, CanonicalMetadata, RawTags, TagBackend};
use crate::geo::{GeoError, GpsPrecision};
use crate::report::{self, FileRecord, ReportError, ReportOptions};
use crate::stamp::orientation;
use crate::stamp::overlay::{self, Annotator, OverlayError};

/// Extensions picked up by every run.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];
/// Extensions added when HEIF input is enabled.
const HEIF_EXTENSIONS: &[&str] = &["heic", "heif"];

/// Files this tool writes itself; never treated as input.
pub const EXCLUDED_SUFFIXES: &[&str] = &["_MD.png", "_MD.txt", "_MD.xlsx", "_metadata.txt", "_temp.jpg"];

/// Suffix of the raw tag dump written next to the outputs.
const RAW_DUMP_SUFFIX: &str = "_metadata.txt";

/// Input image container, determined from the file extension.
///
/// # Example
///
/// ```rust
/// use exif_stamp::pipeline::ImageKind;
/// use std::path::Path;
///
/// assert_eq!(ImageKind::from_path(Path::new("IMG_0001.JPG")), Some(ImageKind::Jpeg));
/// assert!(ImageKind::Png.honours_orientation());
/// assert!(!ImageKind::Heif.is_decodable());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Heif,
}

impl ImageKind {
    /// Determine the image kind from a file path extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "heic" | "heif" => Some(Self::Heif),
            _ => None,
        }
    }

    /// Whether the EXIF orientation tag is applied before annotating.
    ///
    /// HEIF decoders deliver upright pixels; JPEG and PNG store them as shot.
    pub fn honours_orientation(self) -> bool {
        matches!(self, Self::Jpeg | Self::Png)
    }

    /// Whether this build can decode the pixels.
    pub fn is_decodable(self) -> bool {
        !matches!(self, Self::Heif)
    }
}

/// Orientation tag to apply to a decoded image of `kind`.
pub fn orientation_for(kind: ImageKind, metadata: &CanonicalMetadata) -> Option<u16> {
    if kind.honours_orientation() { metadata.orientation } else { None }
}

/// Why a single file could not be processed.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("{backend} could not read metadata: {reason}")]
    Extraction { backend: String, reason: String },
    #[error("malformed metadata: {0}")]
    Metadata(#[from] GeoError),
    #[error("cannot decode image: {0}")]
    Decode(String),
    #[error("cannot render annotation: {0}")]
    Render(#[from] OverlayError),
    #[error("cannot write output: {0}")]
    Output(String),
    /// The file is left in place rather than quarantined.
    #[error("skipped: {0}")]
    Unsupported(String),
}

/// A file that went all the way through the pipeline.
#[derive(Debug, Clone)]
pub struct Processed {
    pub record: FileRecord,
    /// The annotated PNG.
    pub output: PathBuf,
    pub raw_dump: Option<PathBuf>,
    pub source_deleted: bool,
}

/// Outcome of [`Batch::process_image`] for one file.
#[derive(Debug)]
pub struct ProcessResult {
    pub path: PathBuf,
    pub outcome: Result<Processed, ProcessError>,
}

/// A file that failed and where it was moved to.
#[derive(Debug, Clone)]
pub struct Failure {
    pub path: PathBuf,
    pub reason: String,
    /// `None` when moving the file into quarantine failed as well.
    pub quarantined: Option<PathBuf>,
}

/// Result of a whole run.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Number of image files found.
    pub total: usize,
    pub processed: usize,
    pub failures: Vec<Failure>,
    /// Files left untouched because no decoder is available for them.
    pub skipped: Vec<PathBuf>,
    /// Records of every processed file, in processing order.
    pub records: Vec<FileRecord>,
    /// Where the report was written.
    pub report: Option<PathBuf>,
    /// Set when writing the report failed; `records` can be written again.
    pub report_error: Option<ReportError>,
}

/// Filters applied while walking the input tree.
#[derive(Debug, Clone, Default)]
pub struct CollectOptions {
    pub include_heif: bool,
    /// Directories (e.g. output or quarantine nested in the input) to skip.
    pub exclude_dirs: Vec<PathBuf>,
}

/// Collect supported image files under `input_dir`, sorted by file name.
///
/// Directories are walked recursively (following symlinks). Files this tool
/// produced itself are skipped, as are the directories in
/// [`CollectOptions::exclude_dirs`].
///
/// # Example
///
/// ```rust,no_run
/// use exif_stamp::pipeline::{CollectOptions, collect_images};
/// use std::path::Path;
///
/// let images = collect_images(Path::new("./IMAGES_IN"), &CollectOptions::default());
/// println!("Found {} images", images.len());
/// ```
pub fn collect_images(input_dir: &Path, options: &CollectOptions) -> Vec<PathBuf> {
    if !input_dir.is_dir() {
        log::warn!("Input directory does not exist: {}", input_dir.display());
        return Vec::new();
    }

    let excluded: Vec<PathBuf> = options
        .exclude_dirs
        .iter()
        .filter_map(|d| fs::canonicalize(d).ok())
        .collect();

    WalkDir::new(input_dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !entry.file_type().is_dir()
                || fs::canonicalize(entry.path())
                    .map(|p| !excluded.contains(&p))
                    .unwrap_or(true)
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_supported_image(e.path(), options.include_heif))
        .map(|e| e.into_path())
        .collect()
}

/// Check if a file has a supported image extension and is not one of our outputs.
fn is_supported_image(path: &Path, include_heif: bool) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if EXCLUDED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
        return false;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
                || (include_heif && HEIF_EXTENSIONS.contains(&ext.as_str()))
        })
        .unwrap_or(false)
}

/// Body of the annotation for one file.
///
/// Starts with the file name, then one line per tag that is present. A file
/// without any tag gets `No Metadata Available`.
pub fn annotation_text(filename: &str, metadata: &CanonicalMetadata, precision: GpsPrecision) -> String {
    let mut text = format!("Filename: {filename}\n");
    if metadata.is_empty() {
        text.push_str("No Metadata Available\n");
        return text;
    }

    let m = metadata;
    if m.gps_latitude.is_some() {
        let lat = crate::geo::convert(m.gps_latitude.as_ref(), m.gps_lat_ref.unwrap_or('N'), precision);
        let _ = writeln!(text, "Latitude: {lat}");
    }
    if m.gps_longitude.is_some() {
        let lon = crate::geo::convert(m.gps_longitude.as_ref(), m.gps_lon_ref.unwrap_or('E'), precision);
        let _ = writeln!(text, "Longitude: {lon}");
    }
    if let Some(ref date) = m.origin_date {
        let _ = writeln!(text, "Date/Time: {date}");
    }
    if let Some(ref offset) = m.offset_time {
        let _ = writeln!(text, "Offset Time: {offset}");
    }
    if let Some(o) = m.orientation {
        match exif::orientation_label(o) {
            Some(label) => {
                let _ = writeln!(text, "Orientation: {label}");
            }
            None => {
                let _ = writeln!(text, "Orientation: {o}");
            }
        }
    }
    if let Some(ref make) = m.make {
        let _ = writeln!(text, "Make: {make}");
    }
    if let Some(ref model) = m.model {
        let _ = writeln!(text, "Model: {model}");
    }
    if let (Some(w), Some(h)) = (m.image_width, m.image_height) {
        let _ = writeln!(text, "Image Size: {w} x {h}");
    }
    if let Some(mp) = m.megapixels {
        let _ = writeln!(text, "Megapixels: {mp}");
    }
    text
}

/// Write every raw tag as `key: value` lines.
fn write_raw_dump(tags: &RawTags, path: &Path) -> io::Result<()> {
    let mut out = String::new();
    for (key, value) in tags {
        let _ = writeln!(out, "{key}: {value}");
    }
    fs::write(path, out)
}

/// Raw dump file name matching an annotated output: `<name>_metadata.txt`.
fn raw_dump_name(output: &Path) -> String {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = format!("{}.png", overlay::OUTPUT_SUFFIX);
    let base = name.strip_suffix(&suffix).unwrap_or(&name);
    format!("{base}{RAW_DUMP_SUFFIX}")
}

/// Decode `path`, along with the orientation stored in the image data.
///
/// The embedded orientation is `None` when absent or already upright.
fn decode(path: &Path) -> Result<(DynamicImage, Option<u16>), ProcessError> {
    let decode_error = |e: image::ImageError| ProcessError::Decode(e.to_string());
    let mut decoder = ImageReader::open(path)
        .map_err(|e| ProcessError::Decode(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| ProcessError::Decode(e.to_string()))?
        .into_decoder()
        .map_err(decode_error)?;
    let embedded = decoder
        .orientation()
        .ok()
        .filter(|o| !matches!(o, Orientation::NoTransforms))
        .map(|o| u16::from(o.to_exif()));
    let image = DynamicImage::from_decoder(decoder).map_err(decode_error)?;
    Ok((image, embedded))
}

/// Move a failed file into `error_dir`.
///
/// Name collisions get a ` (n)` suffix. When a rename is not possible (e.g.
/// across filesystems) the file is copied and the original removed.
pub fn quarantine(path: &Path, error_dir: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(error_dir)?;
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let target = unique_destination(error_dir, Path::new(name));

    if fs::rename(path, &target).is_err() {
        fs::copy(path, &target)?;
        fs::remove_file(path)?;
    }
    Ok(target)
}

/// First free `dir/name`, `dir/stem (1).ext`, `dir/stem (2).ext`, ...
fn unique_destination(dir: &Path, name: &Path) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let stem = name.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let ext = name.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
    (1..)
        .map(|n| dir.join(format!("{stem} ({n}){ext}")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Remove everything inside `dir`, keeping the directory itself.
///
/// Returns the number of entries removed; a missing directory counts as empty.
pub fn clear_directory(dir: &Path) -> io::Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed += 1;
    }
    log::info!("Cleared {removed} entries from {}", dir.display());
    Ok(removed)
}

/// One configured run over an input directory.
///
/// # Example
///
/// ```rust,no_run
/// use exif_stamp::config::Config;
/// use exif_stamp::pipeline::Batch;
/// use std::path::Path;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::load(Some("config.json".as_ref()))?;
/// let batch = Batch::new(config, Path::new("./IMAGES_IN"))?;
/// let summary = batch.run();
/// println!("{} of {} processed", summary.processed, summary.total);
/// # Ok(())
/// # }
/// ```
pub struct Batch {
    config: Config,
    backend: Box<dyn TagBackend>,
    annotator: Annotator,
    input_dir: PathBuf,
    output_dir: PathBuf,
    error_dir: PathBuf,
    run_date: NaiveDate,
    /// Output paths handed out during the current run.
    claimed: Mutex<HashSet<PathBuf>>,
}

impl Batch {
    /// Build the backend and locate a font; fails before any file is touched.
    pub fn new(config: Config, input_dir: &Path) -> Result<Self> {
        let annotator = Annotator::from_config(&config.overlay).context("Cannot render annotations")?;
        let backend = exif::build_backend(&config.extraction);
        Ok(Self::with_parts(config, input_dir, backend, annotator))
    }

    /// Assemble a batch from an explicit backend and annotator.
    pub fn with_parts(
        config: Config,
        input_dir: &Path,
        backend: Box<dyn TagBackend>,
        annotator: Annotator,
    ) -> Self {
        let output_dir = config.output.output_dir_for(input_dir);
        let error_dir = config.output.error_dir_for(input_dir);
        Self {
            config,
            backend,
            annotator,
            input_dir: input_dir.to_path_buf(),
            output_dir,
            error_dir,
            run_date: Local::now().date_naive(),
            claimed: Mutex::new(HashSet::new()),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn error_dir(&self) -> &Path {
        &self.error_dir
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Where this run's report goes.
    pub fn report_path(&self) -> PathBuf {
        report::report_path(&self.output_dir, &self.input_dir, self.config.report.format)
    }

    /// Input images of this run.
    pub fn images(&self) -> Vec<PathBuf> {
        collect_images(
            &self.input_dir,
            &CollectOptions {
                include_heif: self.config.extraction.include_heif,
                exclude_dirs: vec![self.output_dir.clone(), self.error_dir.clone()],
            },
        )
    }

    /// Extract, annotate and save a single image.
    pub fn process_image(&self, path: &Path) -> ProcessResult {
        ProcessResult {
            path: path.to_path_buf(),
            outcome: self.try_process(path),
        }
    }

    fn try_process(&self, path: &Path) -> Result<Processed, ProcessError> {
        let kind = ImageKind::from_path(path)
            .ok_or_else(|| ProcessError::Decode("unsupported file extension".to_string()))?;
        if !kind.is_decodable() {
            return Err(ProcessError::Unsupported(format!("no {kind:?} decoder in this build")));
        }
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let extraction = self.backend.extract(path)?;
        let mut metadata = extraction.metadata;
        log::debug!("{} tags read from {filename}", extraction.raw.len());

        let (decoded, embedded) = decode(path)?;
        if metadata.orientation.is_none() {
            metadata.orientation = embedded;
        }
        let upright = orientation::correct(decoded, orientation_for(kind, &metadata));

        let body = annotation_text(&filename, &metadata, self.config.report.gps_precision);
        let annotated = self.annotator.composite(&upright, &body)?;
        let output = self.claim_output(overlay::output_path(
            path,
            &self.output_dir,
            self.config.output.layout,
            &body,
            self.run_date,
        ));
        overlay::save_annotated(&annotated, &output)
            .map_err(|e| ProcessError::Output(format!("{e:#}")))?;

        let raw_dump = if self.config.report.write_raw_metadata {
            let dump_path = self.output_dir.join(raw_dump_name(&output));
            write_raw_dump(&extraction.raw, &dump_path)
                .map_err(|e| ProcessError::Output(format!("{}: {e}", dump_path.display())))?;
            Some(dump_path)
        } else {
            None
        };

        let record = FileRecord::from_file(path, metadata)
            .map_err(|e| ProcessError::Output(format!("{}: {e}", path.display())))?;

        let mut source_deleted = false;
        if self.config.output.delete_source {
            match fs::remove_file(path) {
                Ok(()) => source_deleted = true,
                Err(e) => log::warn!("Could not delete source {}: {e}", path.display()),
            }
        }

        Ok(Processed {
            record,
            output,
            raw_dump,
            source_deleted,
        })
    }

    /// Reserve `candidate`, or its first numbered variant another file of
    /// this run has not taken.
    fn claim_output(&self, candidate: PathBuf) -> PathBuf {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        let mut target = candidate.clone();
        let mut n = 0;
        while claimed.contains(&target) {
            n += 1;
            target = overlay::numbered_output(&candidate, n);
        }
        claimed.insert(target.clone());
        target
    }

    /// Process every input image, quarantine failures, then write the report.
    pub fn run(&self) -> RunSummary {
        let images = self.images();
        let mut summary = RunSummary {
            total: images.len(),
            ..RunSummary::default()
        };
        self.claimed.lock().unwrap_or_else(PoisonError::into_inner).clear();

        for (i, path) in images.iter().enumerate() {
            log::info!("[{}/{}] Processing: {}", i + 1, images.len(), path.display());
            let result = self.process_image(path);
            match result.outcome {
                Ok(processed) => {
                    log::info!("  Wrote {}", processed.output.display());
                    summary.processed += 1;
                    summary.records.push(processed.record);
                }
                Err(ProcessError::Unsupported(reason)) => {
                    log::warn!("  Left in place, {reason}");
                    summary.skipped.push(result.path);
                }
                Err(err) => {
                    log::error!("  Failed: {err}");
                    let quarantined = match quarantine(path, &self.error_dir) {
                        Ok(target) => {
                            log::warn!("  Moved to {}", target.display());
                            Some(target)
                        }
                        Err(e) => {
                            log::error!("  Could not quarantine {}: {e}", path.display());
                            None
                        }
                    };
                    summary.failures.push(Failure {
                        path: result.path,
                        reason: err.to_string(),
                        quarantined,
                    });
                }
            }
        }

        if self.config.report.enabled {
            match self.write_report(&summary.records) {
                Ok(path) => summary.report = Some(path),
                Err(e) => {
                    log::error!("{e}");
                    summary.report_error = Some(e);
                }
            }
        }
        summary
    }

    /// Append `records` to this run's report.
    pub fn write_report(&self, records: &[FileRecord]) -> Result<PathBuf, ReportError> {
        let path = self.report_path();
        let options = ReportOptions {
            format: self.config.report.format,
            gps_precision: self.config.report.gps_precision,
            header: self.config.overlay.header.clone(),
        };
        report::append(records, &path, &options)?;
        Ok(path)
    }
}
