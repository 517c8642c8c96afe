//! Progress-callback trait for per-document batch events.
//!
//! Inject an [`Arc<dyn BatchProgressCallback>`] via
//! [`crate::config::ExtractionConfigBuilder::progress_callback`] to receive
//! events as [`crate::Extractor::run_batch`] works through its documents.
//! Events arrive in submission order because the batch is sequential.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf2table::{BatchProgressCallback, BatchStatus, ExtractionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     rows: AtomicUsize,
//! }
//!
//! impl BatchProgressCallback for CountingCallback {
//!     fn on_document_complete(&self, index: usize, total: usize, name: &str, status: BatchStatus, rows: usize) {
//!         self.rows.fetch_add(rows, Ordering::SeqCst);
//!         eprintln!("{}/{} {}: {} ({} rows)", index + 1, total, name, status, rows);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback { rows: AtomicUsize::new(0) });
//!
//! let config = ExtractionConfig::builder()
//!     .progress_callback(counter as Arc<dyn BatchProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::aggregate::BatchStatus;
use crate::output::BatchSummary;
use std::sync::Arc;

/// Called by the batch loop as it processes each document.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `index` is 0-based.
pub trait BatchProgressCallback: Send + Sync {
    /// Called once before the first document.
    fn on_batch_start(&self, total: usize) {
        let _ = total;
    }

    /// Called when a document enters the loop and its ledger entry is `pending`.
    fn on_document_start(&self, index: usize, total: usize, name: &str) {
        let _ = (index, total, name);
    }

    /// Called when a document finishes as `ok` or `empty`.
    fn on_document_complete(
        &self,
        index: usize,
        total: usize,
        name: &str,
        status: BatchStatus,
        rows: usize,
    ) {
        let _ = (index, total, name, status, rows);
    }

    /// Called when a document finishes as `error`.
    fn on_document_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let _ = (index, total, name, error);
    }

    /// Called once after every document has a terminal status.
    fn on_batch_complete(&self, summary: &BatchSummary) {
        let _ = summary;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl BatchProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ExtractionConfig`].
pub type ProgressCallback = Arc<dyn BatchProgressCallback>;
