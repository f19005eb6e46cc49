//! Snippet extraction for search results.

/// Target snippet length in characters.
const SNIPPET_LEN: usize = 200;

/// Extract a snippet from `body` for display under a search hit.
///
/// Vector hits pass the winning chunk's character position; FTS hits pass
/// the query terms and the snippet centers on the first occurrence. Falls
/// back to the head of the document.
pub fn extract_snippet(body: &str, terms: &[String], chunk_pos: Option<usize>) -> String {
    let chars: Vec<char> = body.chars().collect();
    if chars.is_empty() {
        return String::new();
    }

    let center = chunk_pos
        .filter(|p| *p < chars.len())
        .or_else(|| first_term_position(body, terms))
        .unwrap_or(0);

    let start = center.saturating_sub(SNIPPET_LEN / 4);
    let end = (start + SNIPPET_LEN).min(chars.len());
    let mut start = start.min(end);

    // Pull back to a word boundary when we cut mid-word.
    while start > 0 && start < chars.len() && !chars[start - 1].is_whitespace() {
        start -= 1;
        if center - start > SNIPPET_LEN / 2 {
            break;
        }
    }

    let mut text: String = chars[start..end].iter().collect();
    text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if start > 0 {
        text = format!("…{text}");
    }
    if end < chars.len() {
        text.push('…');
    }
    text
}

/// Character position of the earliest case-insensitive term match.
fn first_term_position(body: &str, terms: &[String]) -> Option<usize> {
    let lower = body.to_lowercase();
    terms
        .iter()
        .filter(|t| !t.is_empty())
        .filter_map(|t| lower.find(&t.to_lowercase()))
        .min()
        .map(|byte_idx| lower[..byte_idx].chars().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centers_on_first_term() {
        let body = format!("{} needle in the haystack {}", "x ".repeat(400), "y ".repeat(400));
        let snippet = extract_snippet(&body, &["needle".to_string()], None);
        assert!(snippet.contains("needle"));
        assert!(snippet.starts_with('…'));
        assert!(snippet.ends_with('…'));
    }

    #[test]
    fn falls_back_to_head() {
        let body = "short document body";
        let snippet = extract_snippet(body, &["absent".to_string()], None);
        assert_eq!(snippet, "short document body");
    }

    #[test]
    fn uses_chunk_position() {
        let body = format!("{}target section here", "a ".repeat(500));
        let pos = body.chars().count() - 19;
        let snippet = extract_snippet(&body, &[], Some(pos));
        assert!(snippet.contains("target section"));
    }

    #[test]
    fn empty_body_empty_snippet() {
        assert_eq!(extract_snippet("", &[], None), "");
    }
}
