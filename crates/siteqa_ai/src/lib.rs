pub mod answer;
pub mod chunking;
pub mod deadline;
pub mod embeddings;
pub mod guardrails;
pub mod index;
pub mod llm;
pub mod ollama;
pub mod pipeline;
pub mod retrieve;

pub use answer::{Answer, AnswerSource, FALLBACK_ANSWER};
pub use deadline::CancelToken;
pub use pipeline::{AskOptions, AskResponse, IngestReport, Pipeline, ScoreThreshold};
pub use retrieve::RetrievalResult;
