use std::sync::Arc;
use std::time::Duration;

use siteqa_core::error::{codes, AppError};

use crate::deadline::{call_with_deadline, CancelToken, Interrupted};

/// Text -> vector capability. Implementations must fail loudly rather than return
/// placeholder vectors.
pub trait Embedder: Send + Sync {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError>;

    /// Order-preserving batch form.
    fn embed_many(&self, model: &str, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        inputs.iter().map(|t| self.embed(model, t)).collect()
    }
}

pub mod hash_embed;
pub mod ollama_embed;

pub use hash_embed::HashEmbedder;
pub use ollama_embed::OllamaEmbedder;

pub(crate) fn embed_with_deadline(
    embedder: &Arc<dyn Embedder>,
    model: &str,
    input: &str,
    timeout: Duration,
    cancel: Option<&CancelToken>,
) -> Result<Vec<f32>, AppError> {
    let worker = Arc::clone(embedder);
    let model_owned = model.to_string();
    let input_owned = input.to_string();
    let v = call_with_deadline("embed", timeout, cancel, move || {
        worker.embed(&model_owned, &input_owned)
    })
    .map_err(|i| interrupted_error(i, timeout))??;

    if v.is_empty() {
        return Err(AppError::new(codes::EMBEDDINGS_FAILED, "Embedder returned an empty vector"));
    }
    Ok(v)
}

/// Embed `inputs` in order, one provider call per input, each bounded by `timeout`.
///
/// Stops at the first failure so no further requests are sent once a call has overrun.
pub(crate) fn embed_many_with_deadline(
    embedder: &Arc<dyn Embedder>,
    model: &str,
    inputs: &[String],
    timeout: Duration,
    cancel: Option<&CancelToken>,
) -> Result<Vec<Vec<f32>>, AppError> {
    let mut out = Vec::with_capacity(inputs.len());
    for (pos, input) in inputs.iter().enumerate() {
        let v = embed_with_deadline(embedder, model, input, timeout, cancel).map_err(|e| {
            let details = match e.details.as_deref() {
                Some(d) => format!("{d}; input_index={pos}"),
                None => format!("input_index={pos}"),
            };
            e.with_details(details)
        })?;
        out.push(v);
    }
    Ok(out)
}

fn interrupted_error(i: Interrupted, timeout: Duration) -> AppError {
    match i {
        Interrupted::TimedOut => AppError::new(
            codes::EMBEDDINGS_TIMEOUT,
            "Embedding call exceeded the request timeout",
        )
        .with_details(format!("timeout_ms={}", timeout.as_millis()))
        .with_retryable(true),
        Interrupted::Cancelled => {
            AppError::new(codes::REQUEST_CANCELLED, "Request cancelled during embedding")
        }
        Interrupted::Failed => AppError::new(
            codes::EMBEDDINGS_FAILED,
            "Embedding worker failed before returning a result",
        ),
    }
}
