//! Input normalisation at the system boundary.
//!
//! Two kinds of input enter the pipeline:
//!
//! * PDFs, as a filesystem path or an in-memory byte buffer. [`PdfSource`]
//!   validates them once (existence, permissions, `%PDF` magic) so pdfium
//!   never sees a file that is obviously not a PDF.
//! * Images, as bytes, a path, a reader, or an already-decoded raster.
//!   [`to_image`] turns all of them into a [`DynamicImage`] in RGB or
//!   grayscale mode, so downstream stages only handle one representation and
//!   the model endpoint never receives a transparent channel.

use crate::error::ExtractError;
use image::DynamicImage;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A PDF document to extract from.
///
/// Cheap to clone: byte buffers are shared.
#[derive(Debug, Clone)]
pub enum PdfSource {
    /// PDF on disk.
    Path(PathBuf),
    /// PDF already in memory (uploads, database blobs). `name` is used for
    /// provenance columns and artifact file names.
    Bytes { name: String, data: Arc<[u8]> },
}

impl PdfSource {
    /// Validate a local file and wrap it.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ExtractError> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(ExtractError::FileNotFound { path });
        }

        match std::fs::File::open(&path) {
            Ok(mut f) => {
                let mut magic = [0u8; 4];
                if f.read_exact(&mut magic).is_ok() && &magic != b"%PDF" {
                    return Err(ExtractError::NotAPdf {
                        name: path.display().to_string(),
                        magic,
                    });
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(ExtractError::PermissionDenied { path });
            }
            Err(_) => {
                return Err(ExtractError::FileNotFound { path });
            }
        }

        debug!("Resolved local PDF: {}", path.display());
        Ok(PdfSource::Path(path))
    }

    /// Wrap an in-memory PDF.
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Result<Self, ExtractError> {
        let name = name.into();
        let data: Arc<[u8]> = data.into();
        if data.len() >= 4 && &data[..4] != b"%PDF" {
            let mut magic = [0u8; 4];
            magic.copy_from_slice(&data[..4]);
            return Err(ExtractError::NotAPdf { name, magic });
        }
        Ok(PdfSource::Bytes { name, data })
    }

    /// Display name: the file name for paths, the given name for buffers.
    pub fn name(&self) -> String {
        match self {
            PdfSource::Path(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string()),
            PdfSource::Bytes { name, .. } => name.clone(),
        }
    }

    /// File stem used for artifact names (`plan-A.pdf` → `plan-A`).
    pub fn stem(&self) -> String {
        let name = self.name();
        Path::new(&name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or(name)
    }
}

/// Anything that can be turned into an in-memory raster.
pub enum ImageInput {
    Bytes(Vec<u8>),
    Path(PathBuf),
    Reader(Box<dyn Read + Send>),
    Image(DynamicImage),
}

impl From<DynamicImage> for ImageInput {
    fn from(img: DynamicImage) -> Self {
        ImageInput::Image(img)
    }
}

impl From<Vec<u8>> for ImageInput {
    fn from(bytes: Vec<u8>) -> Self {
        ImageInput::Bytes(bytes)
    }
}

impl From<PathBuf> for ImageInput {
    fn from(path: PathBuf) -> Self {
        ImageInput::Path(path)
    }
}

/// Decode `input` and normalise its colour mode to RGB8 or Luma8.
pub fn to_image(input: ImageInput) -> Result<DynamicImage, ExtractError> {
    let img = match input {
        ImageInput::Image(img) => img,
        ImageInput::Bytes(bytes) => decode_bytes(&bytes)?,
        ImageInput::Path(path) => {
            let bytes = std::fs::read(&path).map_err(|e| {
                ExtractError::UnsupportedImageInput(format!("cannot read '{}': {e}", path.display()))
            })?;
            decode_bytes(&bytes)?
        }
        ImageInput::Reader(mut reader) => {
            let mut bytes = Vec::new();
            reader
                .read_to_end(&mut bytes)
                .map_err(|e| ExtractError::UnsupportedImageInput(format!("read failed: {e}")))?;
            decode_bytes(&bytes)?
        }
    };
    Ok(normalise_mode(img))
}

fn decode_bytes(bytes: &[u8]) -> Result<DynamicImage, ExtractError> {
    if bytes.is_empty() {
        return Err(ExtractError::UnsupportedImageInput("empty byte buffer".into()));
    }
    image::load_from_memory(bytes)
        .map_err(|e| ExtractError::UnsupportedImageInput(format!("not a decodable image: {e}")))
}

/// Keep RGB8 and Luma8 as-is; flatten everything else to RGB8.
pub fn normalise_mode(img: DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_) => img,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}
