use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use siteqa_core::error::AppError;
use tracing::{debug, info};

use crate::deadline::CancelToken;
use crate::guardrails::enforce_citations;
use crate::llm::{generate_with_deadline, Llm};
use crate::retrieve::RetrievalResult;

mod prompts;

/// Returned without calling the language model when no passage clears retrieval.
pub const FALLBACK_ANSWER: &str =
    "I don't know. I could not find relevant information on this site to answer that.";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerSource {
    pub chunk_id: String,
    pub url: String,
    pub title: String,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Answer {
    pub text: String,
    pub retrieval: RetrievalResult,
    /// True only for the no-context path; a model that declines still yields `false`.
    pub fallback: bool,
    pub sources: Vec<AnswerSource>,
    pub cited_chunk_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    pub language_model_id: String,
    pub timeout: Duration,
    pub require_citations: bool,
    pub snippet_chars: usize,
}

pub struct Synthesizer {
    llm: Arc<dyn Llm>,
    opts: SynthesisOptions,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn Llm>, opts: SynthesisOptions) -> Self {
        Self { llm, opts }
    }

    pub fn synthesize(
        &self,
        question: &str,
        retrieval: RetrievalResult,
        cancel: Option<&CancelToken>,
    ) -> Result<Answer, AppError> {
        if retrieval.is_empty() {
            info!("no relevant context; returning fallback answer");
            return Ok(Answer {
                text: FALLBACK_ANSWER.to_string(),
                retrieval,
                fallback: true,
                sources: Vec::new(),
                cited_chunk_ids: Vec::new(),
            });
        }

        let prompt = prompts::grounded_answer_prompt(question.trim(), &context_blocks(&retrieval));
        let text = generate_with_deadline(
            &self.llm,
            &self.opts.language_model_id,
            prompt,
            self.opts.timeout,
            cancel,
        )?;
        let text = text.trim().to_string();

        let allowed: BTreeSet<&str> = retrieval.chunk_ids().into_iter().collect();
        let cited_chunk_ids = enforce_citations(&text, &allowed, self.opts.require_citations)?;

        let sources = answer_sources(&retrieval, self.opts.snippet_chars);
        debug!(
            passages = retrieval.len(),
            cited = cited_chunk_ids.len(),
            "synthesized answer"
        );
        Ok(Answer {
            text,
            retrieval,
            fallback: false,
            sources,
            cited_chunk_ids,
        })
    }
}

fn context_blocks(retrieval: &RetrievalResult) -> String {
    retrieval
        .chunks
        .iter()
        .map(|c| {
            format!(
                "[[chunk:{}]] title={} url={}\n{}",
                c.chunk.chunk_id, c.source.title, c.source.url, c.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n")
}

fn answer_sources(retrieval: &RetrievalResult, snippet_chars: usize) -> Vec<AnswerSource> {
    retrieval
        .chunks
        .iter()
        .map(|c| AnswerSource {
            chunk_id: c.chunk.chunk_id.clone(),
            url: c.source.url.clone(),
            title: c.source.title.clone(),
            snippet: snippet_first_chars(&c.chunk.text, snippet_chars),
        })
        .collect()
}

fn snippet_first_chars(text: &str, max_chars: usize) -> String {
    let t = text.trim();
    match t.char_indices().nth(max_chars) {
        None => t.to_string(),
        Some((cut, _)) => {
            let mut s = t[..cut].to_string();
            s.push_str("...");
            s
        }
    }
}
