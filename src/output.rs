//! Result types returned by the extraction entry points.

use crate::pipeline::normalize::{ExtractionPayload, NormalizedRow};
use crate::pipeline::region::{BoundingBoxRelative, PixelRegion};
use crate::pipeline::render::PagePair;
use serde::Serialize;
use std::path::PathBuf;

/// Outcome of one document's pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentExtraction {
    /// Display name of the source PDF.
    pub document_name: String,
    /// 0-based page index that was processed.
    pub page_index: usize,
    pub bbox: BoundingBoxRelative,
    /// Consolidated rows across all tables.
    pub rows: Vec<NormalizedRow>,
    /// Sorted column union of `rows`.
    pub columns: Vec<String>,
    /// No payload, or a payload with no rows.
    pub is_empty: bool,
    /// Parsed model output; `None` when the reply was not recoverable JSON.
    pub payload: Option<ExtractionPayload>,
    pub artifacts: ExtractionArtifacts,
    /// Pixel region cut from the high-resolution render.
    pub pixel_region: PixelRegion,
    /// DPI the crop was taken at (process or fallback).
    pub render_dpi: u32,
}

/// Side products of an extraction.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionArtifacts {
    /// Saved JPEG crop, when crop saving is enabled.
    pub crop_path: Option<PathBuf>,
    /// The model's reply, verbatim.
    pub raw_text: String,
    /// First table's declared name or the default label.
    pub table_name: String,
}

/// Per-status document counts for a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub ok: usize,
    pub empty: usize,
    pub error: usize,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.ok + self.empty + self.error
    }
}

/// A rendered page pair with the box mapped onto both images.
#[derive(Debug, Clone)]
pub struct PagePreview {
    pub pair: PagePair,
    pub high_res_region: Option<PixelRegion>,
    pub preview_region: Option<PixelRegion>,
}
