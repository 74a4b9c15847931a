use anyhow::{Context, Result, bail};
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use super::{RawTags, TagBackend, TagKeys, TagValue};

const KEYS: TagKeys = TagKeys {
    gps_latitude: "GPSLatitude",
    gps_lat_ref: "GPSLatitudeRef",
    gps_longitude: "GPSLongitude",
    gps_lon_ref: "GPSLongitudeRef",
    origin_date: "DateTimeOriginal",
    offset_time: "OffsetTime",
    orientation: "Orientation",
    make: "Make",
    model: "Model",
    image_width: "ImageWidth",
    image_height: "ImageHeight",
    megapixels: "Megapixels",
};

/// Runs the external `exiftool` program once per file.
#[derive(Debug, Clone)]
pub struct ExifToolBackend {
    executable: PathBuf,
    timeout: Duration,
}

impl ExifToolBackend {
    pub fn new(executable: PathBuf, timeout: Duration) -> Self {
        Self { executable, timeout }
    }

    /// Run `exiftool -j <path>` and return its stdout.
    ///
    /// The child is killed when it does not finish within the timeout.
    fn run(&self, path: &Path) -> Result<Vec<u8>> {
        let mut child = Command::new(&self.executable)
            .arg("-j")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to run {}", self.executable.display()))?;

        let mut stdout = child.stdout.take().context("exiftool stdout was not captured")?;
        let mut stderr = child.stderr.take().context("exiftool stderr was not captured")?;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = tx.send(stdout.read_to_end(&mut buf).map(|_| buf));
        });
        let stderr_reader = thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        });

        let output = match rx.recv_timeout(self.timeout) {
            Ok(read) => read.context("Failed to read exiftool output")?,
            Err(_) => {
                let _ = child.kill();
                let _ = child.wait();
                bail!(
                    "exiftool timed out after {}s on {}",
                    self.timeout.as_secs(),
                    path.display()
                );
            }
        };

        let status = child.wait().context("Failed to wait for exiftool")?;
        let stderr = stderr_reader.join().unwrap_or_default();

        if output.iter().all(u8::is_ascii_whitespace) {
            let detail = stderr.trim();
            if detail.is_empty() {
                bail!("exiftool produced no output ({status})");
            }
            bail!("exiftool failed ({status}): {detail}");
        }
        if !status.success() {
            log::debug!("exiftool exited with {status} for {}: {}", path.display(), stderr.trim());
        }
        Ok(output)
    }
}

impl TagBackend for ExifToolBackend {
    fn name(&self) -> &str {
        "exiftool"
    }

    fn keys(&self) -> &TagKeys {
        &KEYS
    }

    fn read_tags(&self, path: &Path) -> Result<RawTags> {
        let output = self.run(path)?;
        parse_json_output(&output)
            .with_context(|| format!("Unreadable exiftool output for {}", path.display()))
    }
}

/// Parse the JSON that `exiftool -j` prints for a single file.
///
/// exiftool prints an array with one object per file; only the first object
/// is used. Strings stay text, whole numbers become integers, other numbers
/// floats. `null` values are dropped.
pub fn parse_json_output(bytes: &[u8]) -> Result<RawTags> {
    let value: Value = serde_json::from_slice(bytes).context("Malformed exiftool JSON")?;
    let Some(object) = value
        .as_array()
        .and_then(|files| files.first())
        .and_then(Value::as_object)
    else {
        bail!("exiftool JSON is not an array of tag objects");
    };

    let mut tags = RawTags::new();
    for (key, value) in object {
        let tag = match value {
            Value::Null => continue,
            Value::String(s) => TagValue::Text(s.clone()),
            Value::Number(n) => match n.as_i64() {
                Some(i) => TagValue::Integer(i),
                None => TagValue::Float(n.as_f64().unwrap_or_default()),
            },
            other => TagValue::Text(other.to_string()),
        };
        tags.insert(key.clone(), tag);
    }
    Ok(tags)
}
