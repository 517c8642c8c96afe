//! Pipeline stages for region-based table extraction.
//!
//! Each submodule implements one transformation step and is testable on its
//! own.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ region ──▶ encode ──▶ llm ──▶ parse ──▶ normalize
//! (PDF)     (pdfium)   (crop)     (PNG/JPEG) (VLM)   (JSON)    (rows)
//! ```
//!
//! 1. [`input`]     : validate PDF sources; normalise image inputs to RGB/grayscale
//! 2. [`render`]    : rasterise one page at the process DPI, falling back once
//! 3. [`region`]    : map a relative bounding box to pixels and crop
//! 4. [`encode`]    : base64 PNG for the model, JPEG audit copy on disk
//! 5. [`llm`]       : one request per crop, optional timeout; the only network I/O
//! 6. [`parse`]     : recover JSON from noisy replies
//! 7. [`normalize`] : payload variants, emptiness, multi-table consolidation

pub mod encode;
pub mod input;
pub mod llm;
pub mod normalize;
pub mod parse;
pub mod region;
pub mod render;
