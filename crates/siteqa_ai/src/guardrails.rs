use std::collections::BTreeSet;

use siteqa_core::error::{codes, AppError};

pub const CITATION_PREFIX: &str = "[[chunk:";

/// Collect `[[chunk:<id>]]` markers, in first-seen order, without duplicates.
pub fn extract_cited_chunk_ids(output: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut rest = output;
    while let Some(pos) = rest.find(CITATION_PREFIX) {
        let after_prefix = &rest[pos + CITATION_PREFIX.len()..];
        match after_prefix.find("]]") {
            Some(end) => {
                let id = after_prefix[..end].trim();
                // A nested '[' means the marker was never closed before another began.
                if !id.is_empty() && !id.contains('[') && seen.insert(id.to_string()) {
                    out.push(id.to_string());
                }
                rest = &after_prefix[end + 2..];
            }
            None => break,
        }
    }
    out
}

/// Every cited id must be one of `allowed`; with `require_citations`, at least one marker
/// must be present.
///
/// Returns the cited ids on success.
pub fn enforce_citations(
    output: &str,
    allowed: &BTreeSet<&str>,
    require_citations: bool,
) -> Result<Vec<String>, AppError> {
    let cited = extract_cited_chunk_ids(output);
    if require_citations && cited.is_empty() {
        return Err(AppError::new(
            codes::CITATION_REQUIRED,
            "Answer must cite at least one retrieved passage",
        ));
    }
    if let Some(bad) = cited.iter().find(|id| !allowed.contains(id.as_str())) {
        return Err(AppError::new(
            codes::CITATION_INVALID,
            "Answer cited a passage that was not retrieved",
        )
        .with_details(format!("chunk_id={bad}")));
    }
    Ok(cited)
}
