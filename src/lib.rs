//! # edgequake-pdf2table
//!
//! Extract bill-of-materials tables from a region of scanned PDF pages using
//! Vision Language Models (VLMs).
//!
//! Scanned engineering drawings carry their parts list as pixels, not text.
//! This crate renders the page, crops the region the user marked (as
//! fractions of the page, so the same box works at any resolution), asks a
//! VLM for the table as JSON, and normalises whatever comes back into rows
//! with a stable column set.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF + relative bbox
//!  │
//!  ├─ 1. Render     pdfium at 400 DPI, one retry at 340 DPI
//!  ├─ 2. Crop       bbox → pixel region → crop (+ JPEG audit copy)
//!  ├─ 3. VLM        one request: crop + fixed JSON-only instruction
//!  ├─ 4. Parse      recover JSON from fences / prose / labels
//!  ├─ 5. Normalise  all tables → one row set, canonical + union columns
//!  └─ 6. Aggregate  rows + per-document ledger, CSV export
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf2table::{AggregateStore, BoundingBoxRelative, ExtractionConfig, Extractor, PdfSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from GEMINI_API_KEY / OPENAI_API_KEY / …
//!     let extractor = Extractor::new(ExtractionConfig::default())?;
//!     let bbox = BoundingBoxRelative::new(0.55, 0.05, 0.98, 0.45)?;
//!
//!     let doc = PdfSource::from_path("drawing.pdf")?;
//!     let result = extractor.process_document(&doc, 0, &bbox).await?;
//!     println!("{} rows from {}", result.rows.len(), result.artifacts.table_name);
//!
//!     let mut store = AggregateStore::new();
//!     let sources = vec![doc, PdfSource::from_path("drawing-2.pdf")?];
//!     let summary = extractor.run_batch(&sources, 0, &bbox, &mut store).await?;
//!     eprintln!("{} ok / {} empty / {} error", summary.ok, summary.empty, summary.error);
//!     store.export_rows(&extractor.config().output_dir)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2table` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf2table = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod aggregate;
pub mod config;
pub mod error;
pub mod extract;
pub mod output;
pub mod pipeline;
pub mod presets;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use aggregate::{AggregateStore, AggregatedRow, BatchReportEntry, BatchStatus, TabularSnapshot};
pub use config::{ExtractionConfig, ExtractionConfigBuilder};
pub use error::{ExtractError, RenderError};
pub use extract::{inspect, Extractor};
pub use output::{BatchSummary, DocumentExtraction, ExtractionArtifacts, PagePreview};
pub use pipeline::input::{to_image, ImageInput, PdfSource};
pub use pipeline::llm::VisionModel;
pub use pipeline::normalize::{ConsolidatedTable, ExtractionPayload, ExtractedTable, NormalizedRow};
pub use pipeline::region::{BoundingBoxRelative, PixelRegion};
pub use pipeline::render::PageRenderer;
pub use presets::{Preset, PresetStore};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
