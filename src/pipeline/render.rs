//! PDF rasterisation: page → `DynamicImage` at a requested DPI.
//!
//! ## Two attempts, no exceptions
//!
//! Scanned drawings at 400 DPI occasionally exhaust pdfium's bitmap budget or
//! trip over unusual content. [`render_with_fallback`] makes the policy
//! explicit: one attempt at the process resolution, one at the fallback
//! resolution, and a [`RenderOutcome`] that says which one produced the page
//! (or that both failed). Nothing else retries.
//!
//! ## Why a trait?
//!
//! [`PageRenderer`] is the seam between the pipeline and pdfium. The
//! production backend is [`PdfiumRenderer`]; tests swap in in-memory
//! renderers to exercise the fallback and batch-isolation paths without a
//! native library.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is CPU-bound C++ with thread-local state. The async wrappers move
//! each render onto Tokio's blocking pool and await it before the pipeline
//! continues, so the document loop stays strictly sequential.

use crate::error::{ExtractError, RenderError};
use crate::pipeline::input::PdfSource;
use image::imageops::FilterType;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Environment variable naming a directory (or file) with the pdfium library.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// A rasterisation backend.
pub trait PageRenderer: Send + Sync {
    /// Number of pages in the document.
    fn page_count(&self, source: &PdfSource) -> Result<usize, ExtractError>;

    /// Render one page (0-based) at `dpi`.
    fn rasterize(
        &self,
        source: &PdfSource,
        page_index: usize,
        dpi: u32,
    ) -> Result<DynamicImage, RenderError>;
}

/// Primary and fallback resolutions for one render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPolicy {
    pub process_dpi: u32,
    pub fallback_dpi: u32,
}

/// A raster together with the DPI it was produced at.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub image: DynamicImage,
    pub dpi: u32,
}

impl RenderedPage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// High-resolution image for extraction plus a preview derived from it.
#[derive(Debug, Clone)]
pub struct PagePair {
    pub high_res: RenderedPage,
    pub preview: RenderedPage,
}

/// Result of the two-attempt render.
#[derive(Debug)]
pub enum RenderOutcome {
    /// Rendered at the process resolution.
    Primary(RenderedPage),
    /// Process resolution failed; the fallback resolution worked.
    Fallback {
        page: RenderedPage,
        primary_error: RenderError,
    },
    /// Both attempts failed.
    Failed {
        primary_error: RenderError,
        fallback_error: RenderError,
    },
}

impl RenderOutcome {
    /// Collapse into the page or a single [`ExtractError::RenderFailed`].
    pub fn into_result(self, page_index: usize) -> Result<RenderedPage, ExtractError> {
        match self {
            RenderOutcome::Primary(page) | RenderOutcome::Fallback { page, .. } => Ok(page),
            RenderOutcome::Failed {
                primary_error,
                fallback_error,
            } => Err(ExtractError::RenderFailed {
                page: page_index,
                primary_dpi: primary_error.dpi,
                primary: primary_error.detail,
                fallback_dpi: fallback_error.dpi,
                fallback: fallback_error.detail,
            }),
        }
    }
}

/// Render at the process DPI; on failure, exactly one retry at the fallback DPI.
pub fn render_with_fallback(
    renderer: &dyn PageRenderer,
    source: &PdfSource,
    page_index: usize,
    policy: RenderPolicy,
) -> RenderOutcome {
    let primary_error = match renderer.rasterize(source, page_index, policy.process_dpi) {
        Ok(image) => {
            debug!(
                "Rendered page index {} at {} DPI → {}x{} px",
                page_index,
                policy.process_dpi,
                image.width(),
                image.height()
            );
            return RenderOutcome::Primary(RenderedPage {
                image,
                dpi: policy.process_dpi,
            });
        }
        Err(e) => e,
    };

    warn!(
        "{}: page index {} {}; retrying at {} DPI",
        source.name(),
        page_index,
        primary_error,
        policy.fallback_dpi
    );

    match renderer.rasterize(source, page_index, policy.fallback_dpi) {
        Ok(image) => RenderOutcome::Fallback {
            page: RenderedPage {
                image,
                dpi: policy.fallback_dpi,
            },
            primary_error,
        },
        Err(fallback_error) => RenderOutcome::Failed {
            primary_error,
            fallback_error,
        },
    }
}

/// Derive the preview from the high-resolution render.
///
/// Both images come from the same raster, so a box drawn on the preview
/// lands on the same content in the high-resolution image. The preview is
/// downscaled to at most `max_width` pixels wide; its nominal DPI scales
/// accordingly.
pub fn make_pair(high_res: RenderedPage, max_width: u32) -> PagePair {
    let preview = if high_res.width() <= max_width {
        high_res.clone()
    } else {
        let image = high_res
            .image
            .resize(max_width, u32::MAX, FilterType::Lanczos3);
        let dpi = (f64::from(high_res.dpi) * f64::from(image.width())
            / f64::from(high_res.width()))
        .round() as u32;
        RenderedPage { image, dpi }
    };
    PagePair { high_res, preview }
}

/// Async wrapper: page count on the blocking pool.
pub async fn page_count(
    renderer: Arc<dyn PageRenderer>,
    source: PdfSource,
) -> Result<usize, ExtractError> {
    tokio::task::spawn_blocking(move || renderer.page_count(&source))
        .await
        .map_err(|e| ExtractError::Internal(format!("Page-count task panicked: {e}")))?
}

/// Async wrapper: validated page index, two-attempt render.
pub async fn render_page(
    renderer: Arc<dyn PageRenderer>,
    source: PdfSource,
    page_index: usize,
    policy: RenderPolicy,
) -> Result<RenderedPage, ExtractError> {
    tokio::task::spawn_blocking(move || {
        let total = renderer.page_count(&source)?;
        if page_index >= total {
            return Err(ExtractError::PageOutOfRange {
                page: page_index,
                total,
            });
        }
        render_with_fallback(renderer.as_ref(), &source, page_index, policy).into_result(page_index)
    })
    .await
    .map_err(|e| ExtractError::Internal(format!("Render task panicked: {e}")))?
}

/// Async wrapper: render the high-resolution page and derive its preview.
pub async fn render_page_pair(
    renderer: Arc<dyn PageRenderer>,
    source: PdfSource,
    page_index: usize,
    policy: RenderPolicy,
    preview_max_width: u32,
) -> Result<PagePair, ExtractError> {
    let high_res = render_page(renderer, source, page_index, policy).await?;
    tokio::task::spawn_blocking(move || make_pair(high_res, preview_max_width))
        .await
        .map_err(|e| ExtractError::Internal(format!("Preview task panicked: {e}")))
}

// ── pdfium backend ───────────────────────────────────────────────────────

/// [`PageRenderer`] backed by pdfium.
///
/// Binds the library per call, as pdfium documents borrow the binding and
/// cannot outlive it.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRenderer {
    library_path: Option<PathBuf>,
    password: Option<String>,
}

impl PdfiumRenderer {
    pub fn new(library_path: Option<PathBuf>, password: Option<String>) -> Self {
        Self {
            library_path,
            password,
        }
    }

    /// Check the library can be bound at all. Used at startup so a missing
    /// pdfium is a configuration error rather than N document errors.
    pub fn probe(&self) -> Result<(), ExtractError> {
        self.bind().map(|_| ())
    }

    fn bind(&self) -> Result<Pdfium, ExtractError> {
        let explicit = self
            .library_path
            .clone()
            .or_else(|| std::env::var_os(PDFIUM_LIB_PATH_ENV).map(PathBuf::from));

        let bindings = match explicit {
            Some(path) if path.is_dir() => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&path))
            }
            Some(path) => Pdfium::bind_to_library(path),
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| ExtractError::PdfiumBindingFailed(format!("{e:?}")))?;

        Ok(Pdfium::new(bindings))
    }

    fn load<'a>(
        &'a self,
        pdfium: &'a Pdfium,
        source: &'a PdfSource,
    ) -> Result<PdfDocument<'a>, ExtractError> {
        let password = self.password.as_deref();
        let loaded = match source {
            PdfSource::Path(path) => pdfium.load_pdf_from_file(path, password),
            PdfSource::Bytes { data, .. } => pdfium.load_pdf_from_byte_slice(data, password),
        };

        loaded.map_err(|e| {
            let err_str = format!("{e:?}");
            let name = source.name();
            if err_str.contains("Password") || err_str.contains("password") {
                if password.is_some() {
                    ExtractError::WrongPassword { name }
                } else {
                    ExtractError::PasswordRequired { name }
                }
            } else {
                ExtractError::CorruptPdf {
                    name,
                    detail: err_str,
                }
            }
        })
    }
}

impl PageRenderer for PdfiumRenderer {
    fn page_count(&self, source: &PdfSource) -> Result<usize, ExtractError> {
        let pdfium = self.bind()?;
        let document = self.load(&pdfium, source)?;
        let total = document.pages().len() as usize;
        info!("PDF loaded: {} ({} pages)", source.name(), total);
        Ok(total)
    }

    fn rasterize(
        &self,
        source: &PdfSource,
        page_index: usize,
        dpi: u32,
    ) -> Result<DynamicImage, RenderError> {
        let pdfium = self.bind().map_err(|e| RenderError::new(dpi, e.to_string()))?;
        let document = self
            .load(&pdfium, source)
            .map_err(|e| RenderError::new(dpi, e.to_string()))?;

        let page = document
            .pages()
            .get(page_index as u16)
            .map_err(|e| RenderError::new(dpi, format!("{e:?}")))?;

        // PDF user space is 72 units per inch.
        let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| RenderError::new(dpi, format!("{e:?}")))?;

        Ok(bitmap.as_image())
    }
}
