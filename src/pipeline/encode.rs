//! Image encoding for the two places a crop leaves memory.
//!
//! * To the model: lossless PNG, base64-wrapped in an [`ImageData`]. Table
//!   digits are small and JPEG ringing around them costs accuracy.
//! * To disk: a quality-95 JPEG audit copy of exactly the pixels the model
//!   saw, named deterministically from the document stem and page index.

use crate::error::ExtractError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::{Path, PathBuf};
use tracing::debug;

/// JPEG quality for saved crops.
pub const CROP_JPEG_QUALITY: u8 = 95;

/// Encode a crop as a base64 PNG ready for the vision API.
///
/// `detail: "high"` keeps small print legible on tiling models.
pub fn encode_crop(img: &DynamicImage) -> Result<ImageData, ExtractError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded crop → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Replace characters that are invalid in file names on common platforms.
pub fn sanitize_stem(stem: &str) -> String {
    stem.chars()
        .map(|c| if r#"<>:"/\|?*"#.contains(c) { '_' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// `<dir>/<stem>_p<page>_crop.jpg`.
pub fn crop_path(dir: &Path, stem: &str, page_index: usize) -> PathBuf {
    dir.join(format!("{}_p{}_crop.jpg", sanitize_stem(stem), page_index))
}

/// Write `img` as a quality-95 JPEG, creating parent directories.
pub fn save_crop(img: &DynamicImage, path: &Path) -> Result<(), ExtractError> {
    let write_err = |detail: String| ExtractError::CropWriteFailed {
        path: path.to_path_buf(),
        detail,
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| write_err(e.to_string()))?;
    }

    let file = File::create(path).map_err(|e| write_err(e.to_string()))?;
    let mut encoder = JpegEncoder::new_with_quality(BufWriter::new(file), CROP_JPEG_QUALITY);

    // JPEG has no alpha channel.
    let result = match img {
        DynamicImage::ImageLuma8(gray) => encoder.encode_image(gray),
        other => encoder.encode_image(&other.to_rgb8()),
    };
    result.map_err(|e| write_err(e.to_string()))?;

    debug!("Saved crop to {}", path.display());
    Ok(())
}
