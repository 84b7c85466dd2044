use std::sync::Arc;
use std::time::Duration;

use siteqa_core::error::{codes, AppError};

use crate::deadline::{call_with_deadline, CancelToken, Interrupted};

/// Prompt -> text capability.
pub trait Llm: Send + Sync {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, AppError>;
}

pub mod ollama_llm;

pub use ollama_llm::OllamaLlm;

pub(crate) fn generate_with_deadline(
    llm: &Arc<dyn Llm>,
    model: &str,
    prompt: String,
    timeout: Duration,
    cancel: Option<&CancelToken>,
) -> Result<String, AppError> {
    let worker = Arc::clone(llm);
    let model_owned = model.to_string();
    call_with_deadline("llm", timeout, cancel, move || {
        worker.generate(&model_owned, &prompt)
    })
    .map_err(|i| match i {
        Interrupted::TimedOut => AppError::new(
            codes::LLM_TIMEOUT,
            "Language model call exceeded the request timeout",
        )
        .with_details(format!("timeout_ms={}", timeout.as_millis()))
        .with_retryable(true),
        Interrupted::Cancelled => AppError::new(
            codes::REQUEST_CANCELLED,
            "Request cancelled during answer generation",
        ),
        Interrupted::Failed => AppError::new(
            codes::LLM_FAILED,
            "Language model worker failed before returning a result",
        ),
    })?
}
