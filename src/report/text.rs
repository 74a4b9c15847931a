use std::fmt::Write as _;
use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::Path;

use super::{FileRecord, ReportError, ReportOptions, ascii_only, format_filesize_kb};
use crate::exif::parse_origin_date;
use crate::geo::GpsPrecision;

/// Append one block per record; a new file starts with the header and its
/// own name.
pub(super) fn append(
    records: &[FileRecord],
    path: &Path,
    options: &ReportOptions,
) -> Result<(), ReportError> {
    let mut out = String::new();
    if !path.exists() {
        out.push_str(&options.header);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let _ = writeln!(out, "Filename: {name}");
        out.push('\n');
    }
    for record in records {
        write_block(&mut out, record, options.gps_precision);
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| ReportError::from_io(path, e))?;
    file.write_all(out.as_bytes())
        .map_err(|e| ReportError::from_io(path, e))
}

fn write_block(out: &mut String, record: &FileRecord, precision: GpsPrecision) {
    let m = &record.metadata;
    let show = |value: Option<String>| value.unwrap_or_default();

    let _ = writeln!(out, "Filename: {}", record.filename);
    let _ = writeln!(out, "File Size: {}", format_filesize_kb(record.file_size_bytes));
    let _ = writeln!(out, "File Type: {}", record.file_type);
    let _ = writeln!(out, "File Path: {}", record.file_path.display());
    let _ = writeln!(out, "Make: {}", show(m.make.as_deref().map(ascii_only)));
    let _ = writeln!(out, "Model: {}", show(m.model.as_deref().map(ascii_only)));
    let _ = writeln!(out, "Latitude: {}", record.latitude(precision));
    let _ = writeln!(out, "Longitude: {}", record.longitude(precision));
    let _ = writeln!(out, "Origin Date: {}", show(m.origin_date.as_deref().map(parse_origin_date)));
    let _ = writeln!(out, "Orientation: {}", show(m.orientation.map(|o| o.to_string())));
    let _ = writeln!(out, "Image Width: {}", show(m.image_width.map(|w| w.to_string())));
    let _ = writeln!(out, "Image Height: {}", show(m.image_height.map(|h| h.to_string())));
    let _ = writeln!(out, "Offset Time: {}", show(m.offset_time.clone()));
    let _ = writeln!(out, "Megapixels: {}", show(m.megapixels.map(|mp| mp.to_string())));
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exif::CanonicalMetadata;
    use crate::geo::GPS_NOT_FOUND;
    use crate::report::ReportFormat;
    use crate::report::tests::record;
    use tempfile::TempDir;

    fn options() -> ReportOptions {
        ReportOptions {
            format: ReportFormat::Txt,
            gps_precision: GpsPrecision::Standard,
            header: "Tracker v1\n\n".to_string(),
        }
    }

    #[test]
    fn new_report_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trip_MD.txt");
        append(&[record("a.jpg")], &path, &options()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Tracker v1");
        assert_eq!(lines[2], "Filename: trip_MD.txt");
        assert_eq!(lines[4], "Filename: a.jpg");
        assert_eq!(lines[5], "File Size: 2000.00 KB");
        assert_eq!(lines[8], "Make: Cao");
        assert_eq!(lines[10], "Latitude: 40° 26' 46.80\" N");
        assert_eq!(lines[11], format!("Longitude: {GPS_NOT_FOUND}"));
        assert_eq!(lines[12], "Origin Date: 2024-04-26 10:15:30");
        assert_eq!(lines[13], "Orientation: 6");
        assert_eq!(lines[16], "Offset Time: ");
        assert_eq!(lines[17], "Megapixels: 44.8");
        assert!(text.ends_with("\n\n"));
    }

    #[test]
    fn append_keeps_existing_text() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trip_MD.txt");
        append(&[record("a.jpg")], &path, &options()).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        let mut empty = record("b.png");
        empty.metadata = CanonicalMetadata::default();
        append(&[empty], &path, &options()).unwrap();
        let after = std::fs::read_to_string(&path).unwrap();

        assert!(after.starts_with(&before));
        let added = &after[before.len()..];
        assert!(added.starts_with("Filename: b.png\n"));
        assert!(!added.contains("Tracker v1"));
        assert!(added.contains("Make: \n"));
    }
}
