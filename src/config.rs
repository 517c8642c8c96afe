//! Configuration types for region-based table extraction.
//!
//! All extraction behaviour is controlled through [`ExtractionConfig`], built
//! via its [`ExtractionConfigBuilder`]. One struct carries every knob so a
//! config can be shared across the batch loop and printed in logs.

use crate::error::ExtractError;
use crate::progress::BatchProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Model used when none is configured and the provider is Gemini.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Default model for a named provider.
pub fn default_model_for(provider: &str) -> &'static str {
    match provider {
        "openai" => "gpt-4.1-mini",
        "anthropic" => "claude-sonnet-4-20250514",
        _ => DEFAULT_MODEL,
    }
}

/// Configuration for single-document and batch extraction.
///
/// Built via [`ExtractionConfig::builder()`] or using
/// [`ExtractionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_pdf2table::ExtractionConfig;
///
/// let config = ExtractionConfig::builder()
///     .process_dpi(300)
///     .fallback_dpi(200)
///     .model("gemini-2.0-flash")
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ExtractionConfig {
    /// DPI of the extraction render. Range: 72–600. Default: 400.
    ///
    /// Bill-of-materials tables on scanned drawings use small print; 400 DPI
    /// keeps digits legible after cropping.
    pub process_dpi: u32,

    /// DPI of the single retry when the process render fails. Default: 340.
    /// Must be below `process_dpi`.
    pub fallback_dpi: u32,

    /// Maximum preview width in pixels. Default: 1100.
    pub preview_max_width: u32,

    /// Crops with a side shorter than this many pixels are rejected before
    /// the model is called. Default: 8.
    pub min_crop_side_px: u32,

    /// Model identifier. If None, uses the provider's default.
    pub model: Option<String>,

    /// LLM provider name (`gemini`, `openai`, `anthropic`, …).
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate per crop. Default: 8192.
    ///
    /// A long BOM serialised as JSON easily exceeds 4 000 tokens; a truncated
    /// reply parses as nothing and the document is recorded as empty.
    pub max_tokens: usize,

    /// Per-call timeout in seconds. `None` waits indefinitely. Default: 120.
    pub api_timeout_secs: Option<u64>,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// pdfium library location (directory or file). Falls back to
    /// `PDFIUM_LIB_PATH`, then the system library.
    pub pdfium_library_path: Option<PathBuf>,

    /// Directory for saved JPEG crops. Default: `Crop`.
    pub crop_dir: PathBuf,

    /// Save each processed crop as an audit artifact. Default: true.
    pub save_crops: bool,

    /// Directory for CSV exports. Default: `out`.
    pub output_dir: PathBuf,

    /// Optional per-document progress events for batch runs.
    pub progress_callback: Option<Arc<dyn BatchProgressCallback>>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            process_dpi: 400,
            fallback_dpi: 340,
            preview_max_width: 1100,
            min_crop_side_px: 8,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            max_tokens: 8192,
            api_timeout_secs: Some(120),
            password: None,
            pdfium_library_path: None,
            crop_dir: PathBuf::from("Crop"),
            save_crops: true,
            output_dir: PathBuf::from("out"),
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ExtractionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionConfig")
            .field("process_dpi", &self.process_dpi)
            .field("fallback_dpi", &self.fallback_dpi)
            .field("preview_max_width", &self.preview_max_width)
            .field("min_crop_side_px", &self.min_crop_side_px)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("pdfium_library_path", &self.pdfium_library_path)
            .field("crop_dir", &self.crop_dir)
            .field("save_crops", &self.save_crops)
            .field("output_dir", &self.output_dir)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn BatchProgressCallback>"),
            )
            .finish()
    }
}

impl ExtractionConfig {
    /// Create a new builder for `ExtractionConfig`.
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    pub(crate) fn render_policy(&self) -> crate::pipeline::render::RenderPolicy {
        crate::pipeline::render::RenderPolicy {
            process_dpi: self.process_dpi,
            fallback_dpi: self.fallback_dpi,
        }
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ExtractError> {
        if !(72..=600).contains(&self.process_dpi) {
            return Err(ExtractError::InvalidConfig(format!(
                "process DPI must be 72–600, got {}",
                self.process_dpi
            )));
        }
        if self.fallback_dpi < 72 || self.fallback_dpi >= self.process_dpi {
            return Err(ExtractError::InvalidConfig(format!(
                "fallback DPI must be ≥ 72 and below the process DPI ({}), got {}",
                self.process_dpi, self.fallback_dpi
            )));
        }
        if self.preview_max_width < 200 {
            return Err(ExtractError::InvalidConfig(format!(
                "preview width must be ≥ 200 px, got {}",
                self.preview_max_width
            )));
        }
        if self.api_timeout_secs == Some(0) {
            return Err(ExtractError::InvalidConfig(
                "API timeout must be ≥ 1 s (omit it to wait indefinitely)".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn process_dpi(mut self, dpi: u32) -> Self {
        self.config.process_dpi = dpi;
        self
    }

    pub fn fallback_dpi(mut self, dpi: u32) -> Self {
        self.config.fallback_dpi = dpi;
        self
    }

    pub fn preview_max_width(mut self, px: u32) -> Self {
        self.config.preview_max_width = px;
        self
    }

    pub fn min_crop_side_px(mut self, px: u32) -> Self {
        self.config.min_crop_side_px = px.max(1);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn crop_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.crop_dir = dir.into();
        self
    }

    pub fn save_crops(mut self, v: bool) -> Self {
        self.config.save_crops = v;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn progress_callback(mut self, cb: Arc<dyn BatchProgressCallback>) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ExtractionConfig, ExtractError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
