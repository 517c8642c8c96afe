//! Extraction entry points: one document, or a batch into an [`AggregateStore`].
//!
//! ## Per-document pipeline
//!
//! ```text
//! validate bbox ─▶ render (process DPI, one fallback) ─▶ crop ─▶ save JPEG
//!     ─▶ invoke model (timeout) ─▶ parse ─▶ payload ─▶ consolidate
//! ```
//!
//! A reply that is not recoverable JSON is an empty extraction, not an
//! error. Everything else that fails surfaces as an [`ExtractError`].
//!
//! The credential is checked against the service once per [`Extractor`],
//! before its first document.
//!
//! ## Batches
//!
//! [`Extractor::run_batch`] walks its documents strictly in order. Each gets
//! a `pending` ledger entry before any work starts and a terminal status
//! (`ok`, `empty` or `error`) before the next document begins. A failing
//! document never stops the loop; a configuration error
//! ([`ExtractError::is_configuration`]) does, after closing that document's
//! entry as `error`.

use crate::aggregate::{AggregateStore, BatchStatus};
use crate::config::{default_model_for, ExtractionConfig, DEFAULT_MODEL};
use crate::error::ExtractError;
use crate::output::{BatchSummary, DocumentExtraction, ExtractionArtifacts, PagePreview};
use crate::pipeline::llm::{self, LlmVisionModel, VisionModel};
use crate::pipeline::normalize::{self, ExtractionPayload};
use crate::pipeline::region::{self, BoundingBoxRelative};
use crate::pipeline::render::{self, PageRenderer, PdfiumRenderer};
use crate::pipeline::{encode, input::PdfSource, parse};
use crate::prompts::EXTRACTION_PROMPT;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

/// Runs the extraction pipeline with one model and one renderer.
pub struct Extractor {
    config: ExtractionConfig,
    model: Arc<dyn VisionModel>,
    renderer: Arc<dyn PageRenderer>,
    credentials_checked: OnceCell<()>,
}

impl Extractor {
    /// Build with the configured provider and the pdfium renderer.
    ///
    /// # Errors
    /// Configuration errors only: invalid config, no usable provider or
    /// credential, pdfium library not found. Nothing is rendered or sent;
    /// the service sees the credential on [`Extractor::check_credentials`].
    pub fn new(config: ExtractionConfig) -> Result<Self, ExtractError> {
        config.validate()?;

        let plan = plan_provider(&config, &|key| std::env::var(key).ok())?;
        let (provider, model_id) = plan.build()?;
        info!("Using model {}", model_id);

        let renderer = PdfiumRenderer::new(config.pdfium_library_path.clone(), config.password.clone());
        renderer.probe()?;

        let model = LlmVisionModel::new(provider, model_id, config.temperature, config.max_tokens);
        Ok(Self {
            config,
            model: Arc::new(model),
            renderer: Arc::new(renderer),
            credentials_checked: OnceCell::new(),
        })
    }

    /// Build from explicit components (custom backends, tests).
    pub fn with_components(
        config: ExtractionConfig,
        model: Arc<dyn VisionModel>,
        renderer: Arc<dyn PageRenderer>,
    ) -> Result<Self, ExtractError> {
        config.validate()?;
        Ok(Self {
            config,
            model,
            renderer,
            credentials_checked: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Confirm the model service accepts the credential.
    ///
    /// Runs once per extractor; later calls return the cached success. Both
    /// [`Extractor::process_document`] and the batch entry points call it
    /// before touching a document.
    ///
    /// # Errors
    /// [`ExtractError::ProviderNotConfigured`] when the service rejects the
    /// credential or does not answer within `api_timeout_secs`.
    pub async fn check_credentials(&self) -> Result<(), ExtractError> {
        self.credentials_checked
            .get_or_try_init(|| async {
                let check = self.model.check_credentials();
                match self.config.api_timeout_secs {
                    Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), check).await {
                        Ok(result) => result,
                        Err(_) => Err(ExtractError::ProviderNotConfigured {
                            provider: self.model.model_id().to_string(),
                            hint: format!("Credential check got no reply within {secs}s."),
                        }),
                    },
                    None => check.await,
                }
            })
            .await
            .map(|_| ())
    }

    /// Number of pages in `source`.
    pub async fn page_count(&self, source: &PdfSource) -> Result<usize, ExtractError> {
        render::page_count(Arc::clone(&self.renderer), source.clone()).await
    }

    /// Render the HD/preview pair for a page and, given a box, the pixel
    /// region it maps to on each image.
    pub async fn preview(
        &self,
        source: &PdfSource,
        page_index: usize,
        bbox: Option<&BoundingBoxRelative>,
    ) -> Result<PagePreview, ExtractError> {
        if let Some(b) = bbox {
            b.validate()?;
        }
        let pair = render::render_page_pair(
            Arc::clone(&self.renderer),
            source.clone(),
            page_index,
            self.config.render_policy(),
            self.config.preview_max_width,
        )
        .await?;

        let high_res_region = bbox.map(|b| b.to_pixels(pair.high_res.width(), pair.high_res.height()));
        let preview_region = bbox.map(|b| b.to_pixels(pair.preview.width(), pair.preview.height()));
        Ok(PagePreview {
            pair,
            high_res_region,
            preview_region,
        })
    }

    /// Run the full pipeline for one page of one document.
    ///
    /// # Errors
    /// Invalid box (before rendering), render failure after the fallback,
    /// crop too small, crop write failure, model failure or timeout.
    pub async fn process_document(
        &self,
        source: &PdfSource,
        page_index: usize,
        bbox: &BoundingBoxRelative,
    ) -> Result<DocumentExtraction, ExtractError> {
        bbox.validate()?;
        self.check_credentials().await?;
        let start = Instant::now();
        let document_name = source.name();
        info!("Extracting {} (page index {})", document_name, page_index);

        // ── Step 1: Render ───────────────────────────────────────────────
        let page = render::render_page(
            Arc::clone(&self.renderer),
            source.clone(),
            page_index,
            self.config.render_policy(),
        )
        .await?;

        // ── Step 2: Crop ─────────────────────────────────────────────────
        let (crop, pixel_region) = region::crop(&page.image, bbox, self.config.min_crop_side_px)?;
        debug!(
            "{}: crop {:?} ({}x{} px at {} DPI)",
            document_name,
            pixel_region,
            crop.width(),
            crop.height(),
            page.dpi
        );

        // ── Step 3: Audit artifact ───────────────────────────────────────
        let crop_path = if self.config.save_crops {
            let path = encode::crop_path(&self.config.crop_dir, &source.stem(), page_index);
            encode::save_crop(&crop, &path)?;
            Some(path)
        } else {
            None
        };

        // ── Step 4: Invoke ───────────────────────────────────────────────
        let raw_text = llm::invoke_extraction(
            self.model.as_ref(),
            &crop,
            EXTRACTION_PROMPT,
            self.config.api_timeout_secs,
        )
        .await?;

        // ── Step 5: Parse + normalise ────────────────────────────────────
        let payload = parse::parse_loose(&raw_text).map(ExtractionPayload::from);
        if payload.is_none() {
            warn!(
                "{}: model reply is not recoverable JSON; recording as empty",
                document_name
            );
        }
        let table_name = normalize::get_table_name(payload.as_ref());
        let consolidated = payload
            .as_ref()
            .map(normalize::consolidate)
            .unwrap_or_default();
        let is_empty = normalize::is_empty(payload.as_ref());

        info!(
            "{}: {} rows in {:?}",
            document_name,
            consolidated.rows.len(),
            start.elapsed()
        );

        Ok(DocumentExtraction {
            document_name,
            page_index,
            bbox: *bbox,
            rows: consolidated.rows,
            columns: consolidated.columns,
            is_empty,
            payload,
            artifacts: ExtractionArtifacts {
                crop_path,
                raw_text,
                table_name,
            },
            pixel_region,
            render_dpi: page.dpi,
        })
    }

    /// Synchronous wrapper around [`Extractor::process_document`].
    ///
    /// Creates a temporary tokio runtime internally.
    pub fn process_document_sync(
        &self,
        source: &PdfSource,
        page_index: usize,
        bbox: &BoundingBoxRelative,
    ) -> Result<DocumentExtraction, ExtractError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| ExtractError::Internal(format!("Failed to create tokio runtime: {e}")))?
            .block_on(self.process_document(source, page_index, bbox))
    }

    /// Extract the same page and region from every source, in order.
    ///
    /// Rows of `ok` documents are added to `store`; every document gets one
    /// ledger entry.
    ///
    /// # Errors
    /// An invalid `bbox` or a rejected credential, both before any document
    /// is touched. A configuration error raised by a document ends the loop
    /// and is returned; documents after it get no ledger entry.
    pub async fn run_batch(
        &self,
        sources: &[PdfSource],
        page_index: usize,
        bbox: &BoundingBoxRelative,
        store: &mut AggregateStore,
    ) -> Result<BatchSummary, ExtractError> {
        let items = sources.iter().map(|s| (s.name(), Ok(s.clone())));
        self.batch_loop(items, sources.len(), page_index, bbox, store).await
    }

    /// Like [`Extractor::run_batch`], validating each path inside the loop
    /// so a missing or non-PDF file becomes that document's `error` entry.
    pub async fn run_batch_paths(
        &self,
        paths: &[PathBuf],
        page_index: usize,
        bbox: &BoundingBoxRelative,
        store: &mut AggregateStore,
    ) -> Result<BatchSummary, ExtractError> {
        let items = paths.iter().map(|p| {
            let name = p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string());
            (name, PdfSource::from_path(p))
        });
        self.batch_loop(items, paths.len(), page_index, bbox, store).await
    }

    async fn batch_loop(
        &self,
        items: impl Iterator<Item = (String, Result<PdfSource, ExtractError>)>,
        total: usize,
        page_index: usize,
        bbox: &BoundingBoxRelative,
        store: &mut AggregateStore,
    ) -> Result<BatchSummary, ExtractError> {
        bbox.validate()?;
        self.check_credentials().await?;
        let cb = self.config.progress_callback.as_ref();
        if let Some(cb) = cb {
            cb.on_batch_start(total);
        }
        info!("Batch: {} documents, page index {}, bbox {}", total, page_index, bbox);

        let mut summary = BatchSummary::default();
        for (i, (name, source)) in items.enumerate() {
            let entry = store.add_report_entry(&name, BatchStatus::Pending, 0, None);
            if let Some(cb) = cb {
                cb.on_document_start(i, total, &name);
            }

            let result = match source {
                Ok(source) => self.process_document(&source, page_index, bbox).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(extraction) if extraction.is_empty => {
                    store.finish_entry(entry, BatchStatus::Empty, 0, None)?;
                    summary.empty += 1;
                    if let Some(cb) = cb {
                        cb.on_document_complete(i, total, &name, BatchStatus::Empty, 0);
                    }
                }
                Ok(extraction) => {
                    let rows = extraction.rows.len();
                    store.add_rows(
                        extraction.rows,
                        &name,
                        page_index,
                        &extraction.artifacts.table_name,
                    );
                    store.finish_entry(entry, BatchStatus::Ok, rows, None)?;
                    summary.ok += 1;
                    if let Some(cb) = cb {
                        cb.on_document_complete(i, total, &name, BatchStatus::Ok, rows);
                    }
                }
                Err(e) if e.is_configuration() => {
                    let detail = e.to_string();
                    error!("{}: {}; aborting batch", name, detail);
                    store.finish_entry(entry, BatchStatus::Error, 0, Some(detail.clone()))?;
                    if let Some(cb) = cb {
                        cb.on_document_error(i, total, &name, &detail);
                    }
                    return Err(e);
                }
                Err(e) => {
                    let detail = e.to_string();
                    warn!("{}: {}", name, detail);
                    store.finish_entry(entry, BatchStatus::Error, 0, Some(detail.clone()))?;
                    summary.error += 1;
                    if let Some(cb) = cb {
                        cb.on_document_error(i, total, &name, &detail);
                    }
                }
            }
        }

        info!(
            "Batch complete: {} ok, {} empty, {} error",
            summary.ok, summary.empty, summary.error
        );
        if let Some(cb) = cb {
            cb.on_batch_complete(&summary);
        }
        Ok(summary)
    }
}

/// Page count of a PDF. Needs pdfium but no model credential.
pub async fn inspect(source: &PdfSource, config: &ExtractionConfig) -> Result<usize, ExtractError> {
    let renderer: Arc<dyn PageRenderer> = Arc::new(PdfiumRenderer::new(
        config.pdfium_library_path.clone(),
        config.password.clone(),
    ));
    render::page_count(renderer, source.clone()).await
}

// ── Provider resolution ──────────────────────────────────────────────────

/// API-key variable a provider reads, for providers that need one.
pub fn credential_var(provider: &str) -> Option<&'static str> {
    match provider {
        "gemini" | "google" => Some("GEMINI_API_KEY"),
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        _ => None,
    }
}

/// Which provider to construct. Decided without touching the network.
#[derive(Clone)]
enum ProviderPlan {
    Prebuilt {
        provider: Arc<dyn LLMProvider>,
        model: String,
    },
    Named {
        provider: String,
        model: String,
    },
    FromEnv {
        model: String,
    },
}

impl std::fmt::Debug for ProviderPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderPlan::Prebuilt { model, .. } => write!(f, "Prebuilt({model})"),
            ProviderPlan::Named { provider, model } => write!(f, "Named({provider}, {model})"),
            ProviderPlan::FromEnv { model } => write!(f, "FromEnv({model})"),
        }
    }
}

impl ProviderPlan {
    fn build(self) -> Result<(Arc<dyn LLMProvider>, String), ExtractError> {
        match self {
            ProviderPlan::Prebuilt { provider, model } => Ok((provider, model)),
            ProviderPlan::Named { provider, model } => {
                let llm = ProviderFactory::create_llm_provider(&provider, &model).map_err(|e| {
                    ExtractError::ProviderNotConfigured {
                        provider: provider.clone(),
                        hint: e.to_string(),
                    }
                })?;
                Ok((llm, model))
            }
            ProviderPlan::FromEnv { model } => {
                let (llm, _embedding) =
                    ProviderFactory::from_env().map_err(|e| ExtractError::ProviderNotConfigured {
                        provider: "auto".to_string(),
                        hint: format!(
                            "No LLM provider could be auto-detected from environment.\n\
                             Set GEMINI_API_KEY, OPENAI_API_KEY, or ANTHROPIC_API_KEY.\n\
                             Error: {e}"
                        ),
                    })?;
                Ok((llm, model))
            }
        }
    }
}

fn require_credential(
    provider: &str,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<(), ExtractError> {
    match credential_var(provider) {
        Some(var) if env(var).is_none_or(|v| v.trim().is_empty()) => {
            Err(ExtractError::ProviderNotConfigured {
                provider: provider.to_string(),
                hint: format!("Set {var} to an API key for {provider}."),
            })
        }
        _ => Ok(()),
    }
}

/// Resolve the provider, from most-specific to least-specific:
///
/// 1. pre-built provider in the config
/// 2. named provider (its credential variable must be set)
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`
/// 4. `GEMINI_API_KEY`, then `OPENAI_API_KEY`
/// 5. `ProviderFactory::from_env()`
fn plan_provider(
    config: &ExtractionConfig,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<ProviderPlan, ExtractError> {
    let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

    if let Some(ref provider) = config.provider {
        return Ok(ProviderPlan::Prebuilt {
            provider: Arc::clone(provider),
            model: config.model.clone().unwrap_or_else(|| "custom".to_string()),
        });
    }

    if let Some(ref name) = config.provider_name {
        require_credential(name, env)?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| default_model_for(name).to_string());
        return Ok(ProviderPlan::Named {
            provider: name.clone(),
            model,
        });
    }

    if let (Some(provider), Some(model)) = (
        non_empty("EDGEQUAKE_LLM_PROVIDER"),
        non_empty("EDGEQUAKE_MODEL"),
    ) {
        require_credential(&provider, env)?;
        return Ok(ProviderPlan::Named { provider, model });
    }

    for provider in ["gemini", "openai"] {
        if let Some(var) = credential_var(provider) {
            if non_empty(var).is_some() {
                let model = config
                    .model
                    .clone()
                    .unwrap_or_else(|| default_model_for(provider).to_string());
                return Ok(ProviderPlan::Named {
                    provider: provider.to_string(),
                    model,
                });
            }
        }
    }

    Ok(ProviderPlan::FromEnv {
        model: config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string()),
    })
}
