//! End-to-end runs over a temporary input folder.

use exif_stamp::config::Config;
use exif_stamp::exif::{NomExifBackend, RawTags, TagBackend, TagKeys};
use exif_stamp::pipeline::{Batch, ProcessError};
use exif_stamp::report::{Cell, ReportFormat, read_rows};
use exif_stamp::stamp::overlay::{Annotator, FONT_CANDIDATES, load_font};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tempfile::TempDir;

fn jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = RgbaImage::from_fn(width, height, |x, y| Rgba([(x * 7) as u8, (y * 5) as u8, 90, 255]));
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .to_rgb8()
        .write_to(&mut cursor, ImageFormat::Jpeg)
        .unwrap();
    cursor.into_inner()
}

/// Delegates to nom-exif but fails on one file name.
struct FailingBackend {
    inner: NomExifBackend,
    fail_on: &'static str,
}

impl TagBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    fn keys(&self) -> &TagKeys {
        self.inner.keys()
    }

    fn read_tags(&self, path: &Path) -> anyhow::Result<RawTags> {
        if path.file_name().is_some_and(|n| n == self.fail_on) {
            anyhow::bail!("unreadable maker notes");
        }
        self.inner.read_tags(path)
    }
}

fn batch(input: &Path, config: Config) -> Option<Batch> {
    batch_with(input, config, Box::new(NomExifBackend))
}

fn batch_with(input: &Path, config: Config, backend: Box<dyn TagBackend>) -> Option<Batch> {
    let font = FONT_CANDIDATES
        .iter()
        .map(Path::new)
        .filter(|p| p.exists())
        .find_map(|p| load_font(p).ok());
    let Some(font) = font else {
        eprintln!("skipping: no TrueType font available");
        return None;
    };
    let annotator = Annotator::new(font, config.overlay.clone());
    Some(Batch::with_parts(config, input, backend, annotator))
}

/// Input folder with two good JPEGs and one corrupt one.
fn input_tree(root: &Path) -> std::path::PathBuf {
    let input = root.join("IMAGES_IN");
    fs::create_dir_all(input.join("nested")).unwrap();
    fs::write(input.join("a.jpg"), jpeg(40, 30)).unwrap();
    fs::write(input.join("nested").join("c.jpg"), jpeg(30, 40)).unwrap();
    fs::write(input.join("b.jpg"), b"\xFF\xD8\xFF\xE0 definitely not a jpeg").unwrap();
    input
}

#[test]
fn corrupt_file_is_quarantined_and_left_out_of_report() {
    let root = TempDir::new().unwrap();
    let input = input_tree(root.path());
    let Some(batch) = batch(&input, Config::default()) else { return };

    let summary = batch.run();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failures.len(), 1);
    let failure = &summary.failures[0];
    assert_eq!(failure.path, input.join("b.jpg"));
    let quarantined = failure.quarantined.as_ref().unwrap();
    assert_eq!(quarantined, &root.path().join("IMAGES_IN_ERROR").join("b.jpg"));
    assert!(quarantined.exists());
    assert!(!input.join("b.jpg").exists());

    let out = root.path().join("IMAGES_IN_OUT");
    assert!(out.join("a_MD.png").exists());
    assert!(out.join("c_MD.png").exists());
    assert!(!out.join("b_MD.png").exists());

    let report = summary.report.unwrap();
    assert_eq!(report, out.join("IMAGES_IN_MD.xlsx"));
    let rows = read_rows(&report).unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0][0], Cell::Text("Filename".into()));
    let names: Vec<&Cell> = rows[1..].iter().map(|r| &r[0]).collect();
    assert_eq!(names, [&Cell::Text("a.jpg".into()), &Cell::Text("c.jpg".into())]);
}

#[test]
fn second_run_appends_to_report() {
    let root = TempDir::new().unwrap();
    let input = input_tree(root.path());
    let mut config = Config::default();
    config.report.format = ReportFormat::Txt;
    let Some(batch) = batch(&input, config) else { return };

    let first = batch.run();
    let report = first.report.unwrap();
    let before = fs::read_to_string(&report).unwrap();

    // Output and quarantine folders are siblings of the input, so the same
    // two good files are picked up again.
    let second = batch.run();
    assert_eq!(second.processed, 2);
    assert!(second.failures.is_empty());

    let after = fs::read_to_string(&report).unwrap();
    assert!(after.starts_with(&before));
    assert_eq!(after.matches("Filename: a.jpg").count(), 2);
    assert_eq!(after.matches("exif-stamp MetaData Tracker").count(), 1);
}

#[test]
fn extraction_failure_is_quarantined_and_run_continues() {
    let root = TempDir::new().unwrap();
    let input = root.path().join("IMAGES_IN");
    fs::create_dir_all(input.join("nested")).unwrap();
    for path in [input.join("a.jpg"), input.join("b.jpg"), input.join("nested").join("c.jpg")] {
        fs::write(path, jpeg(40, 30)).unwrap();
    }
    let backend = FailingBackend {
        inner: NomExifBackend,
        fail_on: "b.jpg",
    };
    let Some(batch) = batch_with(&input, Config::default(), Box::new(backend)) else { return };

    assert!(matches!(
        batch.process_image(&input.join("b.jpg")).outcome,
        Err(ProcessError::Extraction { ref backend, .. }) if backend == "failing"
    ));

    let summary = batch.run();
    assert_eq!(summary.processed, 2);
    assert_eq!(summary.failures.len(), 1);
    assert!(summary.failures[0].reason.contains("unreadable maker notes"));
    assert!(root.path().join("IMAGES_IN_ERROR").join("b.jpg").exists());
    assert!(!input.join("b.jpg").exists());

    let out = root.path().join("IMAGES_IN_OUT");
    assert!(out.join("a_MD.png").exists());
    assert!(out.join("c_MD.png").exists());
    assert!(!out.join("b_MD.png").exists());

    let rows = read_rows(&summary.report.unwrap()).unwrap();
    let names: Vec<&Cell> = rows[1..].iter().map(|r| &r[0]).collect();
    assert_eq!(names, [&Cell::Text("a.jpg".into()), &Cell::Text("c.jpg".into())]);
}
