//! Identifier and title heuristics for the seed paper, which arrives as a bare
//! PDF without bibliographic metadata.

use crate::citation::clean_doi;
use once_cell::sync::Lazy;
use regex::Regex;

/// Identifier used when the seed text carries no DOI
pub const SEED_FALLBACK_ID: &str = "SEED_PAPER";

/// Title used when no plausible title line is found
pub const SEED_FALLBACK_TITLE: &str = "Seed Paper";

/// Only the first lines of page one are considered for the title
const TITLE_SCAN_LINES: usize = 15;

static SEED_DOI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:doi:?\s*|doi\.org/)(10\.\d{4,}/[^\s\]>},;]+)").expect("valid seed DOI regex")
});

/// DOI printed on the seed paper (a `doi:` label or a `doi.org/` link).
pub fn seed_identifier(text: &str) -> String {
    SEED_DOI_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| clean_doi(m.as_str()))
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| SEED_FALLBACK_ID.to_string())
}

/// First line near the top that looks like a title rather than a running header.
pub fn seed_title(text: &str) -> String {
    text.lines()
        .take(TITLE_SCAN_LINES)
        .map(str::trim)
        .find(|line| {
            let len = line.chars().count();
            let lower = line.to_lowercase();
            (20..=200).contains(&len)
                && !["doi:", "page", "journal", "research article"]
                    .iter()
                    .any(|marker| lower.contains(marker))
        })
        .map(str::to_string)
        .unwrap_or_else(|| SEED_FALLBACK_TITLE.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::citation::extract_doi;

    #[test]
    fn test_seed_identifier_from_label() {
        let text = "Journal of Mammalogy\nDOI: 10.1093/jmammal/gyz123.\nVoles";
        assert_eq!(seed_identifier(text), "10.1093/jmammal/gyz123");
    }

    #[test]
    fn test_seed_identifier_from_link() {
        let text = "available at https://doi.org/10.1002/ece3.5555 under CC-BY";
        assert_eq!(seed_identifier(text), "10.1002/ece3.5555");
    }

    #[test]
    fn test_seed_identifier_keeps_parentheses() {
        let text = "J Chronic Dis 40(5)\ndoi:10.1016/0021-9681(87)90171-8\nA new method";
        assert_eq!(seed_identifier(text), "10.1016/0021-9681(87)90171-8");

        let cited = "Charlson ME (1987). A new method of classifying prognostic comorbidity. doi:10.1016/0021-9681(87)90171-8.";
        assert_eq!(extract_doi(cited), Some(seed_identifier(text)));

        let wrapped = "(doi:10.1016/0021-9681(87)90171-8)";
        assert_eq!(seed_identifier(wrapped), "10.1016/0021-9681(87)90171-8");
    }

    #[test]
    fn test_seed_identifier_fallback() {
        assert_eq!(seed_identifier("no identifier at all"), SEED_FALLBACK_ID);
    }

    #[test]
    fn test_seed_title_skips_headers() {
        let text = "RESEARCH ARTICLE\nJournal of Animal Ecology 2020, page 1\nShort\nSmall mammal communities along an elevation gradient\nA. Author";
        assert_eq!(seed_title(text), "Small mammal communities along an elevation gradient");
    }

    #[test]
    fn test_seed_title_fallback() {
        assert_eq!(seed_title("a\nb\nc"), SEED_FALLBACK_TITLE);
    }
}
