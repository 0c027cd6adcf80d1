//! Text helpers for raw citation strings: DOI extraction, title guessing and
//! identifier normalization.

use once_cell::sync::Lazy;
use regex::Regex;

static DOI_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)https?://(?:dx\.)?doi\.org/(10\.\d{4,}/[^\s\]>},;]+)").expect("valid DOI URL regex")
});

static DOI_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"10\.\d{4,}/[^\s\]>},;]+").expect("valid DOI regex"));

static URL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)https?://\S+").expect("valid URL regex"));

static YEAR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\(?\b(?:19|20)\d{2}[a-z]?\b\)?[.,:]?").expect("valid year regex")
});

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z]{3,}").expect("valid word regex"));

/// Words ignored when building title queries
const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "into", "its", "their", "this", "that",
];

/// Strip trailing punctuation and unbalanced closing brackets from a DOI.
pub fn clean_doi(doi: &str) -> String {
    let mut doi = doi.trim().trim_end_matches(['.', ',', ';', ':']);
    loop {
        let unbalanced_paren = doi.ends_with(')') && doi.matches(')').count() > doi.matches('(').count();
        let unbalanced_bracket = doi.ends_with(']') && doi.matches(']').count() > doi.matches('[').count();
        if unbalanced_paren || unbalanced_bracket {
            doi = doi[..doi.len() - 1].trim_end_matches(['.', ',', ';', ':']);
        } else {
            break;
        }
    }
    doi.to_string()
}

/// Find the first DOI in `text`, preferring `doi.org` URLs.
pub fn extract_doi(text: &str) -> Option<String> {
    if let Some(caps) = DOI_URL_RE.captures(text) {
        return caps.get(1).map(|m| clean_doi(m.as_str()));
    }
    DOI_RE.find(text).map(|m| clean_doi(m.as_str()))
}

/// Canonical form used for visited-set membership (DOIs are case-insensitive).
pub fn normalize_identifier(id: &str) -> String {
    let id = id.trim();
    let lower = id.to_lowercase();
    for prefix in ["https://doi.org/", "http://doi.org/", "https://dx.doi.org/", "http://dx.doi.org/", "doi:"] {
        if let Some(rest) = lower.strip_prefix(prefix) {
            return rest.trim().to_string();
        }
    }
    lower
}

/// Citation text with DOIs and URLs removed.
fn strip_links(citation: &str) -> String {
    let without_urls = URL_RE.replace_all(citation, " ");
    DOI_RE.replace_all(&without_urls, " ").to_string()
}

/// Best-effort title guess for a raw citation.
///
/// Author-year styles put the title right after the year; otherwise the
/// longest sentence-like segment wins.
pub fn guess_title(citation: &str) -> Option<String> {
    let text = strip_links(citation);
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

    let candidate_ok = |s: &str| s.split_whitespace().count() >= 3 && s.len() >= 15;

    if let Some(m) = YEAR_RE.find(&text) {
        let after = &text[m.end()..];
        if let Some(segment) = after
            .split(". ")
            .map(|s| s.trim().trim_end_matches('.'))
            .find(|s| candidate_ok(s))
        {
            return Some(segment.to_string());
        }
    }

    // A segment holding the year is the author block or the source, not the title
    text.split(". ")
        .map(|s| s.trim().trim_end_matches('.'))
        .filter(|s| candidate_ok(s) && !YEAR_RE.is_match(s))
        .max_by_key(|s| s.len())
        .map(|s| s.to_string())
}

/// Up to `max` significant lower-cased words of a title (4+ letters, no stop words).
pub fn query_words(title: &str, max: usize) -> Vec<String> {
    WORD_RE
        .find_iter(title)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| w.len() >= 4 && !STOP_WORDS.contains(&w.as_str()))
        .take(max)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_doi_variants() {
        assert_eq!(
            extract_doi("Ecology 12, 1-10. https://doi.org/10.1002/ecy.1234."),
            Some("10.1002/ecy.1234".to_string())
        );
        assert_eq!(
            extract_doi("doi:10.1016/0021-9681(87)90171-8)"),
            Some("10.1016/0021-9681(87)90171-8".to_string())
        );
        assert_eq!(extract_doi("no identifier here"), None);
    }

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(normalize_identifier("https://doi.org/10.1002/ECY.1234"), "10.1002/ecy.1234");
        assert_eq!(normalize_identifier("DOI:10.1/X"), "10.1/x");
        assert_eq!(normalize_identifier("SEED_PAPER"), "seed_paper");
    }

    #[test]
    fn test_guess_title_author_year() {
        let c = "Smith, J. & Doe, A. (2019). Small mammal abundance in boreal forests. Journal of Ecology, 12, 1-10.";
        assert_eq!(guess_title(c).as_deref(), Some("Small mammal abundance in boreal forests"));
    }

    #[test]
    fn test_guess_title_without_year_prefers_longest_segment() {
        let c = "Hanski I. Population dynamics of shrews and voles in a fragmented northern landscape. Oikos";
        let title = guess_title(c).unwrap_or_default();
        assert!(title.starts_with("Population dynamics"));
    }

    #[test]
    fn test_guess_title_none_for_title_less_styles() {
        assert_eq!(guess_title("https://doi.org/10.1002/ecy.1234"), None);
        assert_eq!(guess_title("Smith J, Doe A (2001) Oikos 12, 1-9. doi:10.1000/x"), None);
    }

    #[test]
    fn test_query_words_skip_stop_words() {
        let words = query_words("The abundance of small mammals in the boreal forest", 3);
        assert_eq!(words, vec!["abundance", "small", "mammals"]);
    }
}
