pub fn grounded_answer_prompt(question: &str, context_blocks: &str) -> String {
    format!(
        r#"You are answering a visitor's question about this website using only the passages below.

Rules (non-negotiable):
1) Use ONLY the context passages provided below. Do not invent facts.
2) If the context does not contain the answer, say "I don't know."
3) Answer in at most three sentences.
4) When a sentence relies on a passage, you may cite it inline as [[chunk:<chunk_id>]]. Cite only passages listed below.

Context passages:
{context_blocks}

Question:
{question}

Answer:
"#
    )
}
