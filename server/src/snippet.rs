use regex::RegexBuilder;
use sitesearch_core::html::visible_text;

const CONTEXT_BEFORE: usize = 100;
const CONTEXT_AFTER: usize = 200;
const MIN_TERM_CHARS: usize = 3;

/// Short excerpt of a page around the query, with matches marked.
pub trait SnippetGenerator: Send + Sync {
    fn snippet(&self, content: &str, query: &str) -> String;
}

/// Excerpt around the first query word found in the page's visible text, each occurrence of a query
/// word (as a word prefix, case-insensitive) wrapped in `<b>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HighlightSnippets;

impl SnippetGenerator for HighlightSnippets {
    fn snippet(&self, content: &str, query: &str) -> String {
        let text = visible_text(content);
        let terms: Vec<String> = query
            .split_whitespace()
            .filter(|t| t.chars().count() >= MIN_TERM_CHARS)
            .map(regex::escape)
            .collect();
        if terms.is_empty() {
            return text.chars().take(CONTEXT_AFTER).collect();
        }
        let Ok(pattern) = RegexBuilder::new(&format!(r"\b(?:{})\w*", terms.join("|")))
            .case_insensitive(true)
            .build()
        else {
            return text.chars().take(CONTEXT_AFTER).collect();
        };

        let excerpt = match pattern.find(&text) {
            Some(m) => window(&text, m.start()),
            None => return text.chars().take(CONTEXT_AFTER).collect(),
        };
        pattern.replace_all(excerpt, "<b>$0</b>").into_owned()
    }
}

/// Up to `CONTEXT_BEFORE` chars before byte offset `at` and `CONTEXT_AFTER` chars from it, cut on
/// char boundaries.
fn window(text: &str, at: usize) -> &str {
    let start = text[..at].char_indices().rev().nth(CONTEXT_BEFORE - 1).map(|(i, _)| i).unwrap_or(0);
    let end = text[at..].char_indices().nth(CONTEXT_AFTER).map(|(i, _)| at + i).unwrap_or(text.len());
    &text[start..end]
}
