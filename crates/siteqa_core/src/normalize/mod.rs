/// Normalize scraped page text before chunking.
///
/// - line endings become `\n`
/// - runs of spaces/tabs collapse to one space, and lines are trimmed
/// - more than one blank line collapses to a single paragraph break (`\n\n`)
/// - leading/trailing whitespace is removed
///
/// The output is a fixed point: `normalize_text(normalize_text(s)) == normalize_text(s)`.
pub fn normalize_text(s: &str) -> String {
    let unified = s.replace("\r\n", "\n").replace('\r', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut pending_newlines = 0usize;
    for line in unified.split('\n') {
        let collapsed = collapse_inline_whitespace(line);
        if collapsed.is_empty() {
            pending_newlines += 1;
            continue;
        }
        if !out.is_empty() {
            if pending_newlines > 0 {
                out.push_str("\n\n");
            } else {
                out.push('\n');
            }
        }
        out.push_str(&collapsed);
        pending_newlines = 0;
    }
    out
}

fn collapse_inline_whitespace(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    for word in line.split(|c: char| c.is_whitespace()) {
        if word.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::normalize_text;

    #[test]
    fn collapses_whitespace_and_blank_lines() {
        let raw = "  Hello\t\tworld  \r\n\r\n\r\n  Second   para \nline  ";
        assert_eq!(normalize_text(raw), "Hello world\n\nSecond para\nline");
    }

    #[test]
    fn normalization_is_idempotent() {
        let raw = "a  b\n\n\n\nc\r\nd";
        let once = normalize_text(raw);
        assert_eq!(normalize_text(&once), once);
    }

    #[test]
    fn whitespace_only_becomes_empty() {
        assert_eq!(normalize_text(" \n\t \r\n "), "");
    }
}
