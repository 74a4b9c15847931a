use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::exif::BackendKind;
use crate::geo::GpsPrecision;
use crate::report::ReportFormat;
use crate::stamp::overlay::{Anchor, OutputLayout};

/// Top-level configuration for an exif-stamp run.
///
/// Every section has defaults, so a config file only needs the keys it
/// changes. CLI flags are applied on top of the loaded values.
///
/// # Loading
///
/// ```rust,no_run
/// use exif_stamp::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.report.format = "txt".parse().unwrap();
/// config.output.delete_source = true;
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which backend reads the tags.
    pub extraction: ExtractionConfig,
    /// Annotation panel appearance.
    pub overlay: OverlayConfig,
    /// Aggregate report settings.
    pub report: ReportConfig,
    /// Directories and file handling.
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub backend: BackendKind,
    /// Executable used by the exiftool backend.
    pub exiftool_path: String,
    /// Seconds an exiftool call may take before it is killed.
    pub timeout_secs: u64,
    /// Also pick up `.heic` / `.heif` files. Without a HEIF decoder they are
    /// reported as skipped and left in the input folder.
    pub include_heif: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            exiftool_path: "exiftool".to_string(),
            timeout_secs: 30,
            include_heif: false,
        }
    }
}

/// Appearance of the annotation panel.
///
/// Colors are RGBA. Sizes are fractions of the image resolution so the panel
/// looks the same on a thumbnail and on a 50 MP capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub anchor: Anchor,
    /// Text printed above the metadata lines.
    pub header: String,
    /// Body used when a file carries no metadata at all.
    pub no_metadata_message: String,
    pub text_color: [u8; 4],
    pub background_color: [u8; 4],
    /// TrueType/OpenType font; a system font is searched for when unset.
    pub font_path: Option<PathBuf>,
    /// Font size as a fraction of the image height.
    pub font_scale: f32,
    /// Lower bound for the font size in pixels.
    pub min_font_size: u32,
    pub padding: PaddingFactors,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            anchor: Anchor::default(),
            header: format!("exif-stamp MetaData Tracker v{}\n\n", env!("CARGO_PKG_VERSION")),
            no_metadata_message: "No Metadata Available\n".to_string(),
            text_color: [0, 0, 0, 255],
            background_color: [255, 255, 255, 128],
            font_path: None,
            font_scale: 0.02,
            min_font_size: 12,
            padding: PaddingFactors::default(),
        }
    }
}

/// Panel padding factors.
///
/// `left` scales the shorter image side, `right` scales the left padding,
/// `top` and `bottom` scale the image height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaddingFactors {
    pub left: f32,
    pub right: f32,
    pub top: f32,
    pub bottom: f32,
}

impl Default for PaddingFactors {
    fn default() -> Self {
        Self {
            left: 0.03,
            right: 0.5,
            top: 0.02,
            bottom: 0.01,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Write the aggregate report at the end of the run.
    pub enabled: bool,
    pub format: ReportFormat,
    pub gps_precision: GpsPrecision,
    /// Dump every raw tag to `<stem>_metadata.txt` next to the outputs.
    pub write_raw_metadata: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            format: ReportFormat::default(),
            gps_precision: GpsPrecision::default(),
            write_raw_metadata: false,
        }
    }
}

/// Output and file handling.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Folder scanned when none is given on the command line.
    pub input_dir: Option<PathBuf>,
    /// Where annotated images and the report go (default: `<input>_OUT`).
    pub output_dir: Option<PathBuf>,
    /// Quarantine for files that failed (default: `<input>_ERROR`).
    pub error_dir: Option<PathBuf>,
    pub layout: OutputLayout,
    /// Remove each source file once its annotated copy is written.
    pub delete_source: bool,
    /// Optional path to a log file.
    pub log_file: Option<String>,
}

impl OutputConfig {
    /// Output directory for a run over `input`.
    pub fn output_dir_for(&self, input: &Path) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| sibling_dir(input, "_OUT"))
    }

    /// Quarantine directory for a run over `input`.
    pub fn error_dir_for(&self, input: &Path) -> PathBuf {
        self.error_dir
            .clone()
            .unwrap_or_else(|| sibling_dir(input, "_ERROR"))
    }
}

/// `<parent>/<name><suffix>` for a directory `dir`.
fn sibling_dir(dir: &Path, suffix: &str) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "IMAGES".to_string());
    let parent = dir.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{name}{suffix}"))
}

impl Config {
    /// Resolve the config file path: next to the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    ///
    /// A missing file yields the defaults; use [`Config::exists`] to tell the
    /// two apart.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", config_path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Whether a config file exists at `path` (or the default location).
    pub fn exists(path: Option<&Path>) -> bool {
        match path {
            Some(p) => p.exists(),
            None => Self::config_path().map(|p| p.exists()).unwrap_or(false),
        }
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Reject values that would make rendering or extraction meaningless.
    pub fn validate(&self) -> Result<()> {
        let overlay = &self.overlay;
        if !(overlay.font_scale.is_finite() && overlay.font_scale > 0.0) {
            bail!("overlay.font_scale must be a positive number, got {}", overlay.font_scale);
        }
        let p = &overlay.padding;
        for (name, value) in [("left", p.left), ("right", p.right), ("top", p.top), ("bottom", p.bottom)] {
            if !(value.is_finite() && value >= 0.0) {
                bail!("overlay.padding.{name} must be zero or positive, got {value}");
            }
        }
        if self.extraction.timeout_secs == 0 {
            bail!("extraction.timeout_secs must be at least 1");
        }
        if self.extraction.exiftool_path.trim().is_empty() {
            bail!("extraction.exiftool_path must not be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.extraction.backend, BackendKind::NomExif);
        assert_eq!(config.extraction.timeout_secs, 30);
        assert!(config.overlay.header.starts_with("exif-stamp MetaData Tracker v"));
        assert!(config.overlay.header.ends_with("\n\n"));
        assert_eq!(config.overlay.background_color, [255, 255, 255, 128]);
        assert_eq!(config.report.format, ReportFormat::Xlsx);
        assert_eq!(config.report.gps_precision, GpsPrecision::Standard);
        assert!(!config.output.delete_source);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.overlay.anchor = Anchor::BottomRight;
        config.report.format = ReportFormat::Txt;
        config.output.layout = OutputLayout::Dated;
        config.save(Some(&path)).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"overlay": {"anchor": "top-right"}, "report": {"format": "txt"}}"#,
        )
        .unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.overlay.anchor, Anchor::TopRight);
        assert_eq!(loaded.overlay.min_font_size, 12);
        assert_eq!(loaded.report.format, ReportFormat::Txt);
        assert!(loaded.report.enabled);
        assert_eq!(loaded.extraction, ExtractionConfig::default());
    }

    #[test]
    fn missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.json");
        assert!(!Config::exists(Some(&path)));
        assert_eq!(Config::load(Some(&path)).unwrap(), Config::default());
    }

    #[test]
    fn malformed_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn invalid_values_rejected() {
        let mut config = Config::default();
        config.overlay.font_scale = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.overlay.padding.top = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.extraction.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn default_directories_are_siblings() {
        let output = OutputConfig::default();
        let input = Path::new("/photos/IMAGES_IN");
        assert_eq!(output.output_dir_for(input), PathBuf::from("/photos/IMAGES_IN_OUT"));
        assert_eq!(output.error_dir_for(input), PathBuf::from("/photos/IMAGES_IN_ERROR"));

        let explicit = OutputConfig {
            error_dir: Some(PathBuf::from("/tmp/quarantine")),
            ..OutputConfig::default()
        };
        assert_eq!(explicit.error_dir_for(input), PathBuf::from("/tmp/quarantine"));
    }
}
