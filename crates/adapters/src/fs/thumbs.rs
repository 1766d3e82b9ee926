use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use homecloud_application::{
    ApplicationError, ThumbnailArtifact, ThumbnailGenerator, ThumbnailJob,
};
use homecloud_domain::path::thumbnail_relative_path;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::io::Reader as ImageReader;
use image::{ColorType, DynamicImage, ImageBuffer, ImageFormat, Rgb};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::workers::JobHandler;

const THUMB_QUALITY: u8 = 82;
const PLACEHOLDER_QUALITY: u8 = 70;
const VIDEO_SEEK_SECONDS: &str = "2";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Renderer {
    Raster,
    VideoFrame,
    Placeholder,
}

/// Maps lowercase file extensions to the renderer able to thumbnail them.
#[derive(Debug, Clone)]
pub struct ThumbnailRegistry {
    by_extension: HashMap<String, Renderer>,
}

impl ThumbnailRegistry {
    pub fn empty() -> Self {
        Self {
            by_extension: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for ext in ["jpg", "jpeg", "png", "webp", "bmp", "tif", "tiff", "gif"] {
            registry.register(ext, Renderer::Raster);
        }
        for ext in ["mp4", "mov", "m4v", "mkv", "avi", "webm", "3gp"] {
            registry.register(ext, Renderer::VideoFrame);
        }
        registry
    }

    pub fn register(&mut self, extension: &str, renderer: Renderer) {
        self.by_extension
            .insert(extension.to_ascii_lowercase(), renderer);
    }

    pub fn renderer_for(&self, path: &Path) -> Renderer {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.by_extension.get(&ext.to_ascii_lowercase()))
            .copied()
            .unwrap_or(Renderer::Placeholder)
    }
}

impl Default for ThumbnailRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[derive(Debug, Clone)]
pub struct FsThumbnailGenerator {
    data_root: PathBuf,
    default_width: u32,
    registry: ThumbnailRegistry,
}

impl FsThumbnailGenerator {
    pub fn new(data_root: impl Into<PathBuf>, default_width: u32) -> Self {
        Self {
            data_root: data_root.into(),
            default_width,
            registry: ThumbnailRegistry::with_defaults(),
        }
    }

    pub fn with_registry(mut self, registry: ThumbnailRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn thumbnail_path(
        &self,
        source_path: &Path,
        width: u32,
    ) -> Result<PathBuf, ApplicationError> {
        let relative = source_path.strip_prefix(&self.data_root).map_err(|_| {
            ApplicationError::InvalidInput(format!(
                "{} is outside the data root",
                source_path.display()
            ))
        })?;
        Ok(self
            .data_root
            .join(thumbnail_relative_path(relative, width)))
    }

    fn render(
        &self,
        source_path: &Path,
        width: u32,
    ) -> Result<(DynamicImage, u8), ApplicationError> {
        match self.registry.renderer_for(source_path) {
            Renderer::Raster => match decode_raster(source_path) {
                Ok(image) => Ok((image.resize(width, width, FilterType::Lanczos3), THUMB_QUALITY)),
                Err(ApplicationError::Decode(error)) => {
                    debug!(
                        source = %source_path.display(),
                        %error,
                        "undecodable image, using placeholder"
                    );
                    Ok((placeholder(width), PLACEHOLDER_QUALITY))
                }
                Err(error) => Err(error),
            },
            Renderer::VideoFrame => match extract_video_frame(source_path) {
                Some(frame) => Ok((
                    frame.resize(width, width, FilterType::Lanczos3),
                    THUMB_QUALITY,
                )),
                None => Ok((placeholder(width), PLACEHOLDER_QUALITY)),
            },
            Renderer::Placeholder => Ok((placeholder(width), PLACEHOLDER_QUALITY)),
        }
    }
}

fn decode_raster(path: &Path) -> Result<DynamicImage, ApplicationError> {
    ImageReader::open(path)
        .map_err(|error| ApplicationError::Io(error.to_string()))?
        .with_guessed_format()
        .map_err(|error| ApplicationError::Decode(error.to_string()))?
        .decode()
        .map_err(|error| ApplicationError::Decode(error.to_string()))
}

/// Grabs one frame a couple of seconds in. `None` when ffmpeg is missing or fails.
fn extract_video_frame(path: &Path) -> Option<DynamicImage> {
    let output = Command::new("ffmpeg")
        .args(["-nostdin", "-loglevel", "error", "-ss", VIDEO_SEEK_SECONDS, "-i"])
        .arg(path)
        .args(["-vframes", "1", "-f", "image2pipe", "-vcodec", "png", "pipe:1"])
        .output();
    match output {
        Ok(output) if output.status.success() && !output.stdout.is_empty() => {
            image::load_from_memory_with_format(&output.stdout, ImageFormat::Png)
                .map_err(|error| debug!(%error, "ffmpeg frame undecodable"))
                .ok()
        }
        Ok(output) => {
            debug!(path = %path.display(), status = %output.status, "ffmpeg produced no frame");
            None
        }
        Err(error) => {
            debug!(%error, "ffmpeg unavailable");
            None
        }
    }
}

fn placeholder(width: u32) -> DynamicImage {
    let side = width.max(1);
    DynamicImage::ImageRgb8(ImageBuffer::from_pixel(side, side, Rgb([48_u8, 48_u8, 48_u8])))
}

/// Encodes to a temp sibling and renames it into place.
fn write_jpeg(image: &DynamicImage, quality: u8, target: &Path) -> Result<(), ApplicationError> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|error| ApplicationError::Io(error.to_string()))?;
    let temp = parent.join(format!(".thumb-{}.tmp", Uuid::new_v4()));

    let encoded = (|| {
        let file = File::create(&temp).map_err(|error| ApplicationError::Io(error.to_string()))?;
        let mut writer = BufWriter::new(file);
        let rgb = image.to_rgb8();
        JpegEncoder::new_with_quality(&mut writer, quality)
            .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
            .map_err(|error| ApplicationError::Io(error.to_string()))?;
        writer
            .flush()
            .map_err(|error| ApplicationError::Io(error.to_string()))?;
        fs::rename(&temp, target).map_err(|error| ApplicationError::Io(error.to_string()))
    })();

    if encoded.is_err() {
        let _ = fs::remove_file(&temp);
    }
    encoded
}

impl ThumbnailGenerator for FsThumbnailGenerator {
    fn ensure_thumbnail(
        &self,
        source_path: &Path,
        width: u32,
    ) -> Result<ThumbnailArtifact, ApplicationError> {
        let thumb_path = self.thumbnail_path(source_path, width)?;
        if thumb_path.exists() {
            return Ok(ThumbnailArtifact {
                file_path: thumb_path,
                generated: false,
            });
        }

        let (image, quality) = self.render(source_path, width)?;
        write_jpeg(&image, quality, &thumb_path)?;
        debug!(source = %source_path.display(), width, "thumbnail written");

        Ok(ThumbnailArtifact {
            file_path: thumb_path,
            generated: true,
        })
    }
}

impl JobHandler<ThumbnailJob> for FsThumbnailGenerator {
    fn handle(&self, job: ThumbnailJob) {
        if let Err(error) = self.ensure_thumbnail(&job.source, self.default_width) {
            warn!(source = %job.source.display(), %error, "thumbnail generation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_png(path: &Path, width: u32, height: u32) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        let img = ImageBuffer::from_fn(width, height, |_x, _y| Rgb([10_u8, 20_u8, 30_u8]));
        img.save(path).expect("save");
    }

    #[test]
    fn creates_thumbnail_mirroring_source_layout() {
        let dir = TempDir::new().expect("tempdir");
        let src = dir.path().join("devices").join("phone").join("x.png");
        write_png(&src, 500, 300);

        let generator = FsThumbnailGenerator::new(dir.path(), 360);
        let out = generator.ensure_thumbnail(&src, 100).expect("thumbnail");

        assert!(out.generated);
        assert_eq!(
            out.file_path,
            dir.path().join(".thumbs/w100/devices/phone/x.png.jpg")
        );
        let thumb = image::open(&out.file_path).expect("open thumb");
        assert_eq!((thumb.width(), thumb.height()), (100, 60));
    }

    #[test]
    fn second_call_reuses_artifact() {
        let dir = TempDir::new().expect("tempdir");
        let src = dir.path().join("a.png");
        write_png(&src, 40, 40);
        let generator = FsThumbnailGenerator::new(dir.path(), 360);

        let first = generator.ensure_thumbnail(&src, 32).expect("first");
        let modified = fs::metadata(&first.file_path)
            .and_then(|meta| meta.modified())
            .expect("mtime");
        let second = generator.ensure_thumbnail(&src, 32).expect("second");

        assert!(first.generated);
        assert!(!second.generated);
        assert_eq!(first.file_path, second.file_path);
        assert_eq!(
            fs::metadata(&second.file_path)
                .and_then(|meta| meta.modified())
                .expect("mtime"),
            modified
        );
    }

    #[test]
    fn unknown_types_get_a_placeholder() {
        let dir = TempDir::new().expect("tempdir");
        let src = dir.path().join("notes.txt");
        fs::write(&src, b"hello").expect("write");

        let out = FsThumbnailGenerator::new(dir.path(), 360)
            .ensure_thumbnail(&src, 64)
            .expect("thumbnail");
        let thumb = image::open(&out.file_path).expect("open thumb");
        assert_eq!((thumb.width(), thumb.height()), (64, 64));
    }

    #[test]
    fn corrupt_images_get_a_placeholder() {
        let dir = TempDir::new().expect("tempdir");
        let src = dir.path().join("bad.jpg");
        fs::write(&src, b"not a jpeg at all").expect("write");
        let generator = FsThumbnailGenerator::new(dir.path(), 360);

        let out = generator.ensure_thumbnail(&src, 64).expect("placeholder");
        assert!(out.generated);
        let thumb = image::open(&out.file_path).expect("open thumb");
        assert_eq!((thumb.width(), thumb.height()), (64, 64));

        let again = generator.ensure_thumbnail(&src, 64).expect("reuse");
        assert!(!again.generated);
    }

    #[test]
    fn custom_registry_reaches_the_generator() {
        let dir = TempDir::new().expect("tempdir");
        let src = dir.path().join("wide.png");
        write_png(&src, 500, 300);
        let mut registry = ThumbnailRegistry::empty();
        registry.register("png", Renderer::Placeholder);

        let out = FsThumbnailGenerator::new(dir.path(), 360)
            .with_registry(registry)
            .ensure_thumbnail(&src, 50)
            .expect("thumbnail");
        let thumb = image::open(&out.file_path).expect("open thumb");
        assert_eq!((thumb.width(), thumb.height()), (50, 50));
    }

    #[test]
    fn sources_outside_root_are_rejected() {
        let dir = TempDir::new().expect("tempdir");
        let result =
            FsThumbnailGenerator::new(dir.path(), 360).ensure_thumbnail(Path::new("/etc/hosts"), 64);
        assert!(matches!(result, Err(ApplicationError::InvalidInput(_))));
    }

    #[test]
    fn registry_lookup_is_case_insensitive() {
        let mut registry = ThumbnailRegistry::with_defaults();
        assert_eq!(registry.renderer_for(Path::new("A.JPG")), Renderer::Raster);
        assert_eq!(registry.renderer_for(Path::new("clip.MOV")), Renderer::VideoFrame);
        assert_eq!(registry.renderer_for(Path::new("raw.cr2")), Renderer::Placeholder);
        registry.register("CR2", Renderer::Raster);
        assert_eq!(registry.renderer_for(Path::new("raw.cr2")), Renderer::Raster);
    }
}
