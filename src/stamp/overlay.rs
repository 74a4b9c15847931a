use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use anyhow::{Context, Result};
use chrono::NaiveDate;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage, imageops};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::config::{OverlayConfig, PaddingFactors};

/// Suffix appended to the stem of every annotated output.
pub const OUTPUT_SUFFIX: &str = "_MD";
/// Line of the annotation text the dated folder layout keys on.
const DATE_LINE_PREFIX: &str = "Date/Time: ";
/// Dated output folder name format.
const FOLDER_DATE_FORMAT: &str = "%m-%d-%Y";

/// Fonts tried, in order, when no font path is configured.
pub const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu-sans-fonts/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/truetype/freefont/FreeSans.ttf",
    "/Library/Fonts/Arial.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "/System/Library/Fonts/Helvetica.ttc",
    "C:\\Windows\\Fonts\\arial.ttf",
];

#[derive(Debug, thiserror::Error)]
pub enum OverlayError {
    #[error(
        "no TrueType font found; set \"overlay.font_path\" in the config file (tried {})",
        .tried.join(", ")
    )]
    FontNotFound { tried: Vec<String> },
    #[error("failed to read font {}: {source}", .path.display())]
    FontRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{} is not a usable TrueType/OpenType font", .path.display())]
    InvalidFont { path: PathBuf },
    #[error("image is {width}x{height}; nothing to draw on")]
    EmptyImage { width: u32, height: u32 },
}

/// Corner of the image the annotation panel is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Anchor {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl FromStr for Anchor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "top-left" | "1" => Ok(Self::TopLeft),
            "top-right" | "2" => Ok(Self::TopRight),
            "bottom-left" | "3" => Ok(Self::BottomLeft),
            "bottom-right" | "4" => Ok(Self::BottomRight),
            other => Err(format!(
                "unknown anchor '{other}' (expected top-left, top-right, bottom-left or bottom-right)"
            )),
        }
    }
}

/// Where annotated images are written inside the output directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLayout {
    /// Directly in the output directory.
    #[default]
    Flat,
    /// Under a `MM-DD-YYYY` folder named after the capture date.
    Dated,
}

/// Load a font file.
pub fn load_font(path: &Path) -> Result<FontVec, OverlayError> {
    let bytes = std::fs::read(path).map_err(|source| OverlayError::FontRead {
        path: path.to_path_buf(),
        source,
    })?;
    FontVec::try_from_vec(bytes).map_err(|_| OverlayError::InvalidFont {
        path: path.to_path_buf(),
    })
}

/// The configured font, or the first well-known system font that exists.
pub fn find_font(config: &OverlayConfig) -> Result<FontVec, OverlayError> {
    if let Some(ref path) = config.font_path {
        return load_font(path);
    }
    for candidate in FONT_CANDIDATES {
        let path = Path::new(candidate);
        if path.exists() {
            match load_font(path) {
                Ok(font) => {
                    log::debug!("Using font {}", path.display());
                    return Ok(font);
                }
                Err(e) => log::debug!("Skipping font: {e}"),
            }
        }
    }
    Err(OverlayError::FontNotFound {
        tried: FONT_CANDIDATES.iter().map(|s| s.to_string()).collect(),
    })
}

/// Font size in pixels for an image of the given height.
pub fn font_size(image_height: u32, scale: f32, min_size: u32) -> u32 {
    ((image_height as f32 * scale).round() as u32).max(min_size)
}

/// Panel padding in pixels, relative to the image resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl Padding {
    pub fn for_image(width: u32, height: u32, factors: &PaddingFactors) -> Self {
        let left = (width.min(height) as f32 * factors.left).round() as u32;
        Self {
            left,
            right: (left as f32 * factors.right).round() as u32,
            top: (height as f32 * factors.top).round() as u32,
            bottom: (height as f32 * factors.bottom).round() as u32,
        }
    }
}

/// Placement of the annotation panel and of the text inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelLayout {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Text origin relative to the panel.
    pub text_x: i32,
    pub text_y: i32,
}

impl PanelLayout {
    /// Size the panel to the measured text plus padding and pin it to `anchor`.
    ///
    /// The panel never extends past the image.
    pub fn compute(
        image_width: u32,
        image_height: u32,
        text_width: u32,
        text_height: u32,
        anchor: Anchor,
        padding: &Padding,
    ) -> Self {
        let width = (text_width + padding.left + padding.right).min(image_width);
        let height = (text_height + padding.top + padding.bottom).min(image_height);

        let x = match anchor {
            Anchor::TopLeft | Anchor::BottomLeft => 0,
            Anchor::TopRight | Anchor::BottomRight => image_width - width,
        };
        let y = match anchor {
            Anchor::TopLeft | Anchor::TopRight => 0,
            Anchor::BottomLeft | Anchor::BottomRight => image_height - height,
        };

        Self {
            x,
            y,
            width,
            height,
            text_x: padding.left as i32,
            text_y: padding.top as i32,
        }
    }

    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && px < self.x + self.width && py >= self.y && py < self.y + self.height
    }
}

/// Renders the annotation panel onto images.
pub struct Annotator {
    font: FontVec,
    config: OverlayConfig,
}

impl Annotator {
    pub fn new(font: FontVec, config: OverlayConfig) -> Self {
        Self { font, config }
    }

    /// Build an annotator from configuration, locating a font.
    pub fn from_config(config: &OverlayConfig) -> Result<Self, OverlayError> {
        Ok(Self::new(find_font(config)?, config.clone()))
    }

    /// Header line followed by `body`, or by the no-metadata message when
    /// `body` is empty.
    pub fn compose_text(&self, body: &str) -> String {
        let body = if body.trim().is_empty() {
            self.config.no_metadata_message.as_str()
        } else {
            body
        };
        format!("{}{}", self.config.header, body)
    }

    /// Pixel size of a multi-line text block.
    fn measure(&self, lines: &[&str], scale: PxScale) -> (u32, u32) {
        let line_height = self.line_height(scale);
        let width = lines
            .iter()
            .map(|line| text_size(scale, &self.font, line).0)
            .max()
            .unwrap_or(0);
        (width, line_height * lines.len() as u32)
    }

    fn line_height(&self, scale: PxScale) -> u32 {
        let scaled = self.font.as_scaled(scale);
        (scaled.height() + scaled.line_gap()).ceil() as u32
    }

    /// Panel geometry for an image of the given size.
    pub fn layout(&self, width: u32, height: u32, text: &str) -> PanelLayout {
        let scale = PxScale::from(font_size(height, self.config.font_scale, self.config.min_font_size) as f32);
        let lines: Vec<&str> = text.lines().collect();
        let (text_w, text_h) = self.measure(&lines, scale);
        let padding = Padding::for_image(width, height, &self.config.padding);
        PanelLayout::compute(width, height, text_w, text_h, self.config.anchor, &padding)
    }

    /// Stamp the annotation for `body` onto `img`.
    ///
    /// The panel is rendered on its own transparent layer and alpha-blended
    /// onto a copy of the image; pixels outside the panel are left as they were.
    pub fn composite(&self, img: &DynamicImage, body: &str) -> Result<RgbaImage, OverlayError> {
        let mut base = img.to_rgba8();
        let (width, height) = base.dimensions();
        if width == 0 || height == 0 {
            return Err(OverlayError::EmptyImage { width, height });
        }
        let text = self.compose_text(body);

        let scale = PxScale::from(font_size(height, self.config.font_scale, self.config.min_font_size) as f32);
        let layout = self.layout(width, height, &text);
        if layout.width == 0 || layout.height == 0 {
            log::warn!("No room for an annotation panel on a {width}x{height} image");
            return Ok(base);
        }

        let mut panel = RgbaImage::from_pixel(layout.width, layout.height, Rgba([255, 255, 255, 0]));
        draw_filled_rect_mut(
            &mut panel,
            Rect::at(0, 0).of_size(layout.width, layout.height),
            Rgba(self.config.background_color),
        );

        let line_height = self.line_height(scale) as i32;
        for (i, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            draw_text_mut(
                &mut panel,
                Rgba(self.config.text_color),
                layout.text_x,
                layout.text_y + i as i32 * line_height,
                scale,
                &self.font,
                line,
            );
        }

        imageops::overlay(&mut base, &panel, layout.x as i64, layout.y as i64);
        Ok(base)
    }
}

/// `MM-DD-YYYY` folder for the `Date/Time:` line of `text`, or `fallback`.
pub fn dated_folder(text: &str, fallback: NaiveDate) -> String {
    text.lines()
        .filter_map(|line| line.strip_prefix(DATE_LINE_PREFIX))
        .find_map(|value| value.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
        .unwrap_or(fallback)
        .format(FOLDER_DATE_FORMAT)
        .to_string()
}

/// Destination of the annotated copy of `source`: `<stem>_MD.png`.
pub fn output_path(
    source: &Path,
    output_dir: &Path,
    layout: OutputLayout,
    text: &str,
    run_date: NaiveDate,
) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = format!("{stem}{OUTPUT_SUFFIX}.png");
    match layout {
        OutputLayout::Flat => output_dir.join(name),
        OutputLayout::Dated => output_dir.join(dated_folder(text, run_date)).join(name),
    }
}

/// `<stem> (n)_MD.png` next to an output path `<stem>_MD.png`.
///
/// Used when two inputs of one run share a stem.
pub fn numbered_output(path: &Path, n: usize) -> PathBuf {
    let suffix = format!("{OUTPUT_SUFFIX}.png");
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let base = name.strip_suffix(&suffix).unwrap_or(&name);
    path.with_file_name(format!("{base} ({n}){suffix}"))
}

/// Write an annotated image as PNG, creating parent folders.
pub fn save_annotated(img: &RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    img.save_with_format(path, ImageFormat::Png)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}
