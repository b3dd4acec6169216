//! Image normalizer: turns a caller's image reference into a base64 payload
//! for the vision request body.
//!
//! Steps for fetchable sources:
//! 1. Retrieve bytes (file read or HTTP GET)
//! 2. Validate size bounds
//! 3. Decode, fix EXIF orientation, bound the long edge
//! 4. Re-encode as JPEG at a fixed quality
//!
//! Data URIs skip all of it: the capture layer already compressed them.
//! Recompression can also be switched off for platforms whose capture layer
//! hands over already-compressed files.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageOutputFormat};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ScanError;

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// Maximum input image size (in bytes) before rejecting.
const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Long-edge bound applied before upload.
pub const DEFAULT_MAX_DIMENSION: u32 = 1600;

/// JPEG quality used when re-encoding.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

const JPEG_MIME: &str = "image/jpeg";

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Where the image to scan comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// `data:image/jpeg;base64,...`, already compressed by the capture layer.
    DataUri(String),
    Path(PathBuf),
    Url(String),
    Bytes(Vec<u8>),
}

impl ImageSource {
    /// Classify a caller-provided image reference.
    pub fn parse(reference: &str) -> Self {
        let trimmed = reference.trim();
        if trimmed.starts_with("data:") {
            ImageSource::DataUri(trimmed.to_string())
        } else if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            ImageSource::Url(trimmed.to_string())
        } else if let Some(path) = trimmed.strip_prefix("file://") {
            ImageSource::Path(PathBuf::from(path))
        } else {
            ImageSource::Path(PathBuf::from(trimmed))
        }
    }

    /// Short label for logs. Never includes the payload.
    pub fn kind(&self) -> &'static str {
        match self {
            ImageSource::DataUri(_) => "data_uri",
            ImageSource::Path(_) => "path",
            ImageSource::Url(_) => "url",
            ImageSource::Bytes(_) => "bytes",
        }
    }
}

/// Platform-dependent compression settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizeOptions {
    /// Decode, downscale and re-encode. Off where the capture layer compresses.
    pub recompress: bool,
    /// Long-edge bound in pixels. Smaller images are never upscaled.
    pub max_dimension: u32,
    /// JPEG quality, 1-100.
    pub jpeg_quality: u8,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            recompress: true,
            max_dimension: DEFAULT_MAX_DIMENSION,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Transport-ready image payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub base64: String,
    pub mime: String,
}

impl EncodedImage {
    pub fn from_bytes(bytes: &[u8], mime: &str) -> Self {
        Self {
            base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            mime: mime.to_string(),
        }
    }

    /// `data:<mime>;base64,<payload>` for the `image_url` content part.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64)
    }
}

// ═══════════════════════════════════════════════════════════
// Normalization
// ═══════════════════════════════════════════════════════════

/// Produce the base64 payload for `source`.
///
/// No retry: fetch and decode failures surface as `ImageFetch` /
/// `ImageDecode` and the caller decides.
pub async fn normalize_image(
    source: &ImageSource,
    options: &NormalizeOptions,
    http: &reqwest::Client,
) -> Result<EncodedImage, ScanError> {
    let bytes = match source {
        ImageSource::DataUri(uri) => {
            let encoded = decode_data_uri(uri)?;
            debug!(
                payload_len = encoded.base64.len(),
                "Data URI passed through without re-encoding"
            );
            return Ok(encoded);
        }
        ImageSource::Path(path) => read_file(path).await?,
        ImageSource::Url(url) => fetch_url(http, url).await?,
        ImageSource::Bytes(bytes) => bytes.clone(),
    };

    validate_image_bytes(&bytes)?;

    if !options.recompress {
        let mime = sniff_mime(&bytes)?;
        debug!(size = bytes.len(), mime, "Image passed through without recompression");
        return Ok(EncodedImage::from_bytes(&bytes, mime));
    }

    let opts = options.clone();
    let jpeg = tokio::task::spawn_blocking(move || recompress_jpeg(&bytes, &opts))
        .await
        .map_err(|e| ScanError::ImageDecode(format!("Image processing task failed: {e}")))??;

    Ok(EncodedImage::from_bytes(&jpeg, JPEG_MIME))
}

/// Split a base64 data URI into its MIME type and payload. No re-encoding.
pub fn decode_data_uri(uri: &str) -> Result<EncodedImage, ScanError> {
    let rest = uri
        .trim()
        .strip_prefix("data:")
        .ok_or_else(|| ScanError::ImageDecode("Not a data URI".into()))?;

    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ScanError::ImageDecode("Data URI has no payload".into()))?;

    if !header
        .split(';')
        .any(|param| param.trim().eq_ignore_ascii_case("base64"))
    {
        return Err(ScanError::ImageDecode(
            "Data URI is not base64-encoded".into(),
        ));
    }

    let payload = payload.trim();
    if payload.is_empty() {
        return Err(ScanError::ImageDecode("Data URI payload is empty".into()));
    }

    let mime = header
        .split(';')
        .next()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(JPEG_MIME);

    Ok(EncodedImage {
        base64: payload.to_string(),
        mime: mime.to_string(),
    })
}

async fn read_file(path: &Path) -> Result<Vec<u8>, ScanError> {
    tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ScanError::ImageFetch(format!("Image file not found: {}", path.display()))
        } else {
            ScanError::ImageFetch(format!("Could not read image file: {e}"))
        }
    })
}

async fn fetch_url(http: &reqwest::Client, url: &str) -> Result<Vec<u8>, ScanError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| ScanError::ImageFetch(format!("Could not download image: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ScanError::ImageFetch(format!(
            "Image download failed (HTTP {})",
            status.as_u16()
        )));
    }

    if let Some(declared) = response.content_length() {
        check_declared_length(declared)?;
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ScanError::ImageFetch(format!("Image download interrupted: {e}")))?;
    Ok(bytes.to_vec())
}

// ═══════════════════════════════════════════════════════════
// Pure helpers
// ═══════════════════════════════════════════════════════════

/// Reject a download whose declared length is over the limit before reading
/// the body.
pub fn check_declared_length(declared: u64) -> Result<(), ScanError> {
    if declared > MAX_IMAGE_BYTES as u64 {
        return Err(ScanError::ImageFetch(format!(
            "Image download of {declared} bytes exceeds {}MB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Validate image bytes before decoding.
pub fn validate_image_bytes(bytes: &[u8]) -> Result<(), ScanError> {
    if bytes.is_empty() {
        return Err(ScanError::ImageDecode("Image data is empty".into()));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ScanError::ImageDecode(format!(
            "Image data exceeds {}MB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Decode, orient, bound the long edge, and re-encode as JPEG.
pub fn recompress_jpeg(bytes: &[u8], options: &NormalizeOptions) -> Result<Vec<u8>, ScanError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| ScanError::ImageDecode(format!("Failed to decode image: {e}")))?;
    let (orig_w, orig_h) = img.dimensions();

    let img = apply_orientation(img, read_exif_orientation(bytes));

    let (w, h) = img.dimensions();
    let (target_w, target_h) = compute_fit_dimensions(w, h, options.max_dimension);
    let img = if (target_w, target_h) != (w, h) {
        img.resize_exact(target_w, target_h, FilterType::CatmullRom)
    } else {
        img
    };

    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut cursor = Cursor::new(Vec::new());
    rgb.write_to(&mut cursor, ImageOutputFormat::Jpeg(options.jpeg_quality))
        .map_err(|e| ScanError::ImageDecode(format!("JPEG encoding failed: {e}")))?;
    let jpeg = cursor.into_inner();

    debug!(
        original = format!("{orig_w}x{orig_h}"),
        output = format!("{target_w}x{target_h}"),
        input_size = bytes.len(),
        jpeg_size = jpeg.len(),
        quality = options.jpeg_quality,
        "Image recompressed for upload"
    );

    Ok(jpeg)
}

/// Scale so the long edge is at most `max_dim`, preserving aspect ratio.
/// Small images are NOT upscaled.
pub fn compute_fit_dimensions(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (1, 1);
    }

    let largest = width.max(height);
    if largest <= max_dim {
        return (width, height);
    }

    let scale = max_dim as f32 / largest as f32;
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, max_dim);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, max_dim);
    (new_w, new_h)
}

/// Read EXIF tag 0x0112 (Orientation). Returns 1 (normal) if absent.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply an EXIF orientation transform so phone photos arrive upright.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        1 => img,
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// MIME type for bytes sent without recompression. Only formats the vision
/// endpoint accepts pass.
fn sniff_mime(bytes: &[u8]) -> Result<&'static str, ScanError> {
    match image::guess_format(bytes) {
        Ok(ImageFormat::Jpeg) => Ok(JPEG_MIME),
        Ok(ImageFormat::Png) => Ok("image/png"),
        Ok(ImageFormat::Gif) => Ok("image/gif"),
        Ok(ImageFormat::WebP) => Ok("image/webp"),
        Ok(other) => Err(ScanError::ImageDecode(format!(
            "Unsupported image format: {other:?}"
        ))),
        Err(_) => Err(ScanError::ImageDecode(
            "Unrecognized image format".into(),
        )),
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
