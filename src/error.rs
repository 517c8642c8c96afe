//! Error types for the edgequake-pdf2table library.
//!
//! Two error types reflect two different scopes:
//!
//! * [`ExtractError`]: everything that stops a *document* (or, for the
//!   configuration variants, the whole run). Single-document callers get it
//!   back directly; the batch loop converts it into an `error` ledger entry
//!   and moves on to the next document.
//!
//! * [`RenderError`]: one failed rasterisation attempt at one DPI. The
//!   renderer produces at most two of these per page (process resolution,
//!   then fallback) before folding them into [`ExtractError::RenderFailed`].
//!
//! An unparseable model response is not an error: it is an
//! empty extraction, see [`crate::pipeline::parse`].

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the edgequake-pdf2table library.
#[derive(Debug, Error)]
pub enum ExtractError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The source was read, but is not a PDF.
    #[error("'{name}' is not a valid PDF\nFirst bytes: {magic:?}")]
    NotAPdf { name: String, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{name}' is corrupt: {detail}")]
    CorruptPdf { name: String, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{name}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { name: String },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{name}'")]
    WrongPassword { name: String },

    /// Requested page index (0-based) is outside `[0, total)`.
    #[error("Page index {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// Both the process-resolution and the fallback render failed.
    #[error(
        "Rendering failed for page index {page}: {primary_dpi} DPI: {primary}; \
         fallback {fallback_dpi} DPI: {fallback}"
    )]
    RenderFailed {
        page: usize,
        primary_dpi: u32,
        primary: String,
        fallback_dpi: u32,
        fallback: String,
    },

    // ── Crop validation ───────────────────────────────────────────────────
    /// Relative bounding box violates `0 ≤ x0 < x1 ≤ 1`, `0 ≤ y0 < y1 ≤ 1`.
    #[error("Invalid bounding box: {0}")]
    InvalidBoundingBox(String),

    /// The box is valid but maps to (almost) no pixels on the rendered page.
    #[error("Crop region {width}x{height} px is too small (minimum side {min_side} px)")]
    CropTooSmall {
        width: u32,
        height: u32,
        min_side: u32,
    },

    // ── Image errors ──────────────────────────────────────────────────────
    /// The image input could not be turned into an in-memory raster.
    #[error("Unsupported image input: {0}")]
    UnsupportedImageInput(String),

    /// Encoding or decoding a raster failed.
    #[error("Image encoding failed: {0}")]
    ImageDecode(#[from] image::ImageError),

    // ── Model errors ──────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Transport, authentication or quota failure from the model service.
    #[error("Model invocation failed: {message}")]
    InvocationFailed { message: String },

    /// The model call did not answer within the configured timeout.
    #[error("Model invocation timed out after {secs}s")]
    InvocationTimeout { secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not write the audit crop image.
    #[error("Failed to write crop image '{path}': {detail}")]
    CropWriteFailed { path: PathBuf, detail: String },

    /// Could not write a CSV export.
    #[error("Failed to write export '{path}': {detail}")]
    ExportFailed { path: PathBuf, detail: String },

    /// Preset file could not be read or written.
    #[error("Preset store '{path}': {detail}")]
    PresetStore { path: PathBuf, detail: String },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/dir-containing-libpdfium or install pdfium system-wide."
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    /// Configuration errors abort a run before any document is touched.
    ///
    /// Everything else is scoped to the document that raised it.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ExtractError::ProviderNotConfigured { .. }
                | ExtractError::InvalidConfig(_)
                | ExtractError::PdfiumBindingFailed(_)
        )
    }
}

/// One failed rasterisation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("render at {dpi} DPI failed: {detail}")]
pub struct RenderError {
    pub dpi: u32,
    pub detail: String,
}

impl RenderError {
    pub fn new(dpi: u32, detail: impl Into<String>) -> Self {
        Self {
            dpi,
            detail: detail.into(),
        }
    }
}
