//! Model interaction: one crop, one fixed instruction, one text reply.
//!
//! The pipeline talks to the model through [`VisionModel`], a single-call
//! interface with no conversation state. [`LlmVisionModel`] backs it with an
//! `edgequake-llm` provider; tests substitute scripted models.
//!
//! There is no retry here. A failed call is an [`ExtractError::InvocationFailed`]
//! and the batch loop records it against the document. Rejected credentials
//! are [`ExtractError::ProviderNotConfigured`] instead and end the run. The
//! only bound is the optional per-call timeout applied by [`invoke_extraction`].

use crate::error::ExtractError;
use crate::pipeline::{encode, input};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, LlmError};
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::debug;

/// A vision-capable model: image plus instruction in, raw text out.
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Identifier reported in logs.
    fn model_id(&self) -> &str;

    /// Send exactly one request and return the reply text.
    async fn send(&self, image: ImageData, instruction: &str) -> Result<String, ExtractError>;

    /// Confirm the service accepts the credential. Called once before the
    /// first document; any error here is a configuration error.
    async fn check_credentials(&self) -> Result<(), ExtractError> {
        Ok(())
    }
}

/// [`VisionModel`] backed by an `edgequake-llm` chat provider.
pub struct LlmVisionModel {
    provider: Arc<dyn LLMProvider>,
    model: String,
    options: CompletionOptions,
}

impl LlmVisionModel {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: usize,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            options: build_options(temperature, max_tokens),
        }
    }
}

#[async_trait]
impl VisionModel for LlmVisionModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    /// Message layout:
    /// 1. **System message**: the extraction instruction
    /// 2. **User message**: the crop as an image attachment, empty text
    async fn send(&self, image: ImageData, instruction: &str) -> Result<String, ExtractError> {
        let messages = vec![
            ChatMessage::system(instruction),
            ChatMessage::user_with_images("", vec![image]),
        ];

        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| map_llm_error(&self.model, e))?;

        debug!(
            "{}: {} input tokens, {} output tokens",
            self.model, response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }

    /// One-token text request; no image.
    async fn check_credentials(&self) -> Result<(), ExtractError> {
        let messages = vec![ChatMessage::user("ping")];
        let options = build_options(0.0, 1);
        self.provider
            .chat(&messages, Some(&options))
            .await
            .map(|_| debug!("{}: credential accepted", self.model))
            .map_err(|e| ExtractError::ProviderNotConfigured {
                provider: self.provider.name().to_string(),
                hint: format!("Credential check against {} failed: {e}", self.model),
            })
    }
}

/// Auth and configuration failures end the run; anything else is scoped to
/// the document.
fn map_llm_error(model: &str, e: LlmError) -> ExtractError {
    match e {
        LlmError::AuthError(_) | LlmError::ConfigError(_) => ExtractError::ProviderNotConfigured {
            provider: model.to_string(),
            hint: e.to_string(),
        },
        other => ExtractError::InvocationFailed {
            message: other.to_string(),
        },
    }
}

fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

/// Normalise the crop, encode it, and send it with `instruction`.
///
/// `timeout_secs = None` waits indefinitely.
pub async fn invoke_extraction(
    model: &dyn VisionModel,
    crop: &DynamicImage,
    instruction: &str,
    timeout_secs: Option<u64>,
) -> Result<String, ExtractError> {
    let start = Instant::now();
    let image = encode::encode_crop(&input::normalise_mode(crop.clone()))?;

    let reply = match timeout_secs {
        Some(secs) => timeout(Duration::from_secs(secs), model.send(image, instruction))
            .await
            .map_err(|_| ExtractError::InvocationTimeout { secs })??,
        None => model.send(image, instruction).await?,
    };

    debug!(
        "{} replied with {} chars in {:?}",
        model.model_id(),
        reply.len(),
        start.elapsed()
    );
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::sync::Mutex;

    #[test]
    fn build_options_carries_sampling_settings() {
        let opts = build_options(0.0, 8192);
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(8192));
    }

    struct EchoModel {
        seen: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl VisionModel for EchoModel {
        fn model_id(&self) -> &str {
            "echo"
        }

        async fn send(&self, image: ImageData, instruction: &str) -> Result<String, ExtractError> {
            self.seen
                .lock()
                .unwrap()
                .push((image.mime_type.clone(), instruction.to_string()));
            Ok("{\"tables\":[]}".into())
        }
    }

    struct StallingModel;

    #[async_trait]
    impl VisionModel for StallingModel {
        fn model_id(&self) -> &str {
            "stall"
        }

        async fn send(&self, _image: ImageData, _instruction: &str) -> Result<String, ExtractError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(String::new())
        }
    }

    fn transparent_crop() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 0])))
    }

    #[tokio::test]
    async fn sends_png_with_instruction() {
        let model = EchoModel {
            seen: Mutex::new(Vec::new()),
        };
        let reply = invoke_extraction(&model, &transparent_crop(), "extract", Some(5))
            .await
            .unwrap();
        assert_eq!(reply, "{\"tables\":[]}");

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], ("image/png".to_string(), "extract".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out() {
        let err = invoke_extraction(&StallingModel, &transparent_crop(), "extract", Some(2))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::InvocationTimeout { secs: 2 }));
    }

    #[test]
    fn auth_failures_are_configuration_errors() {
        let err = map_llm_error("gemini-2.0-flash", LlmError::AuthError("API key not valid".into()));
        assert!(err.is_configuration(), "got {err:?}");
        assert!(err.to_string().contains("API key not valid"));

        let err = map_llm_error("gemini-2.0-flash", LlmError::RateLimited("quota".into()));
        assert!(matches!(err, ExtractError::InvocationFailed { .. }));
        assert!(!err.is_configuration());
    }

    #[tokio::test]
    async fn credential_check_accepts_a_working_provider() {
        let provider: Arc<dyn LLMProvider> = Arc::new(edgequake_llm::MockProvider::new());
        let model = LlmVisionModel::new(provider, "mock-model", 0.0, 8192);
        model.check_credentials().await.unwrap();
    }
}
