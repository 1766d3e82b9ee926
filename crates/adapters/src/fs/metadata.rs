use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::process::Command;

use chrono::NaiveDateTime;
use exif::{Exif, In, Reader, Tag, Value};
use homecloud_application::MetadataExtractor;
use homecloud_domain::ExifSummary;
use tracing::debug;

const EXIF_DATETIME_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// EXIF via kamadak-exif, video duration via `ffprobe` when installed.
#[derive(Debug, Default)]
pub struct KamadakExifReader;

fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    let Value::Ascii(ref parts) = field.value else {
        return None;
    };
    let text = String::from_utf8_lossy(parts.first()?)
        .trim_matches(char::from(0))
        .trim()
        .to_string();
    (!text.is_empty()).then_some(text)
}

/// `2024:05:01 10:00:00` -> `2024-05-01T10:00:00`. Unparsable values are kept verbatim.
pub fn normalize_exif_datetime(raw: &str) -> String {
    NaiveDateTime::parse_from_str(raw.trim(), EXIF_DATETIME_FORMAT)
        .map(|parsed| parsed.format("%Y-%m-%dT%H:%M:%S").to_string())
        .unwrap_or_else(|_| raw.trim().to_string())
}

impl MetadataExtractor for KamadakExifReader {
    fn read_exif(&self, path: &Path) -> Option<ExifSummary> {
        let file = File::open(path).ok()?;
        let mut reader = BufReader::new(file);
        let exif = match Reader::new().read_from_container(&mut reader) {
            Ok(exif) => exif,
            Err(error) => {
                debug!(path = %path.display(), %error, "no EXIF data");
                return None;
            }
        };

        let datetime = ascii_field(&exif, Tag::DateTimeOriginal)
            .or_else(|| ascii_field(&exif, Tag::DateTime))
            .map(|raw| normalize_exif_datetime(&raw));
        let camera_model = ascii_field(&exif, Tag::Model);
        if datetime.is_none() && camera_model.is_none() {
            return None;
        }
        Some(ExifSummary {
            datetime,
            camera_model,
        })
    }

    fn video_duration(&self, path: &Path) -> Option<f64> {
        let output = Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output();
        let output = match output {
            Ok(output) if output.status.success() => output,
            Ok(output) => {
                debug!(path = %path.display(), status = %output.status, "ffprobe failed");
                return None;
            }
            Err(error) => {
                debug!(%error, "ffprobe unavailable");
                return None;
            }
        };
        String::from_utf8_lossy(&output.stdout).trim().parse().ok()
    }
}
