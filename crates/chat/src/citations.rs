//! Source URL extraction from reply text.

use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;

/// Matches bare URLs and the target of markdown links (`[title](url)`).
/// One level of balanced parentheses may appear inside a URL
/// (`/wiki/Foo_(bar)`); an unmatched `)` ends it.
static URL_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r#"https?://(?:[^\s<>()\[\]"'`]|\([^\s<>()\[\]"'`]*\))+"#).ok()
});

/// Every URL in `text`, in order of appearance, trailing punctuation removed.
pub fn extract_citations(text: &str) -> Vec<String> {
    let Some(re) = URL_RE.as_ref() else {
        return Vec::new();
    };
    re.find_iter(text)
        .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':', '!', '?']))
        .filter(|url| url.len() > "https://".len())
        .map(String::from)
        .collect()
}

/// Drop repeated URLs, keeping the first occurrence.
pub fn dedupe_citations(urls: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    urls.into_iter()
        .filter(|url| seen.insert(url.clone()))
        .collect()
}
