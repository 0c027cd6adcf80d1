//! Reference-section discovery and citation segmentation.
//!
//! The heuristics are fuzzy by nature, so they sit behind the
//! [`ReferenceParser`] trait; [`HeadingReferenceParser`] is the default.

use once_cell::sync::Lazy;
use regex::Regex;
use std::ops::Range;
use tracing::debug;

/// Entries shorter than this are page numbers, running headers and the like
const MIN_CITATION_LEN: usize = 20;

/// Default section labels, matched case-insensitively against a whole line
pub const DEFAULT_HEADINGS: &[&str] = &["References", "Literature Cited", "Bibliography"];

/// Headings that close a trailing reference section
const END_HEADINGS: &[&str] = &[
    "Appendix",
    "Appendices",
    "Acknowledgments",
    "Acknowledgements",
    "Supplementary Material",
    "Supplementary Information",
    "Supporting Information",
    "Tables",
    "Figure Legends",
    "Figure Captions",
];

/// Splits a document's text into raw citation strings.
pub trait ReferenceParser: Send + Sync {
    /// Yield the citations of `text` in order; empty when no section is found.
    ///
    /// Entry boundaries are located up front. Each citation string is only
    /// built when the iterator reaches it.
    fn citations<'a>(&'a self, text: &'a str) -> Box<dyn Iterator<Item = String> + 'a>;
}

/// Locates the last heading in `headings` and splits the section below it.
#[derive(Debug, Clone)]
pub struct HeadingReferenceParser {
    heading_re: Regex,
    end_re: Regex,
}

impl Default for HeadingReferenceParser {
    fn default() -> Self {
        Self {
            heading_re: DEFAULT_HEADING_RE.clone(),
            end_re: END_RE.clone(),
        }
    }
}

static DEFAULT_HEADING_RE: Lazy<Regex> =
    Lazy::new(|| heading_regex(DEFAULT_HEADINGS).expect("valid default heading regex"));

static END_RE: Lazy<Regex> = Lazy::new(|| heading_regex(END_HEADINGS).expect("valid end heading regex"));

/// A line holding only the heading, optionally numbered ("7.", "VII.", "7 ").
fn heading_regex(labels: &[&str]) -> Result<Regex, regex::Error> {
    let alternatives = labels
        .iter()
        .map(|l| regex::escape(l.trim()).replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(
        r"(?im)^[ \t]*(?:(?:\d{{1,2}}|[IVXLC]{{1,6}})\.?[ \t]+)?(?:{})[ \t]*:?[ \t]*$",
        alternatives
    ))
}

impl HeadingReferenceParser {
    /// Parser recognising a custom set of heading labels.
    pub fn with_headings(labels: &[&str]) -> Result<Self, regex::Error> {
        Ok(Self {
            heading_re: heading_regex(labels)?,
            end_re: END_RE.clone(),
        })
    }

    /// The text between the last reference heading and the next end heading.
    pub fn find_section<'a>(&self, text: &'a str) -> Option<&'a str> {
        let heading = self.heading_re.find_iter(text).last()?;
        let rest = &text[heading.end()..];
        let end = self.end_re.find(rest).map(|m| m.start()).unwrap_or(rest.len());
        let section = &rest[..end];
        if section.trim().is_empty() {
            None
        } else {
            Some(section)
        }
    }
}

impl ReferenceParser for HeadingReferenceParser {
    fn citations<'a>(&'a self, text: &'a str) -> Box<dyn Iterator<Item = String> + 'a> {
        let Some(section) = self.find_section(text) else {
            debug!("No reference section found");
            return Box::new(std::iter::empty());
        };

        let spans = segment(section);
        debug!(count = spans.len(), "Segmented reference section");
        Box::new(
            spans
                .into_iter()
                .map(move |span| normalize_entry(&section[span]))
                .filter(|e| e.len() >= MIN_CITATION_LEN),
        )
    }
}

/// Byte ranges of the entries in `section`, split with the most specific
/// strategy that applies.
pub fn segment(section: &str) -> Vec<Range<usize>> {
    if let Some(refs) = split_numbered(section, &BRACKET_RE) {
        return refs;
    }
    if let Some(refs) = split_numbered(section, &DOTTED_RE) {
        return refs;
    }
    if let Some(refs) = split_author_lines(section) {
        return refs;
    }
    split_blank_lines(section)
}

static BRACKET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*\[(\d{1,3})\][ \t]*").expect("valid bracket regex"));

static DOTTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(\d{1,3})\.[ \t]+").expect("valid dotted regex"));

/// Numbered styles; numbering must start at 1 and run sequentially.
fn split_numbered(section: &str, re: &Regex) -> Option<Vec<Range<usize>>> {
    let caps: Vec<_> = re.captures_iter(section).collect();
    if caps.len() < 2 {
        return None;
    }

    let numbers: Vec<u32> = caps
        .iter()
        .take(5)
        .filter_map(|c| c.get(1)?.as_str().parse().ok())
        .collect();
    if numbers.first() != Some(&1) || !numbers.windows(2).all(|w| w[1] == w[0] + 1) {
        return None;
    }

    let starts: Vec<(usize, usize)> = caps
        .iter()
        .filter_map(|c| c.get(0).map(|m| (m.start(), m.end())))
        .collect();

    let spans = starts
        .iter()
        .enumerate()
        .map(|(i, &(_, content_start))| {
            let end = starts.get(i + 1).map(|&(s, _)| s).unwrap_or(section.len());
            content_start..end
        })
        .filter(|span| !section[span.clone()].trim().is_empty())
        .collect();
    Some(spans)
}

static AUTHOR_START_RE: Lazy<Regex> = Lazy::new(|| {
    // "Smith, J.", "Smith J", "van der Berg, A.", "Åström, K.", "SMITH, J."
    Regex::new(r"^(?:(?:van|von|de|der|den|da|di|du|le|la)\s+)*[A-Z\u{00C0}-\u{024F}][A-Za-z\u{00C0}-\u{024F}'\-]+,?\s+[A-Z]\.?(?:[\s,]|$)")
        .expect("valid author regex")
});

static YEAR_IN_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:19|20)\d{2}[a-z]?\b").expect("valid year regex"));

/// Author-year styles: a line opening with an author name starts a new entry
/// when the previous line closed one (ends with a period or a year/page).
fn split_author_lines(section: &str) -> Option<Vec<Range<usize>>> {
    let mut bounds: Vec<usize> = Vec::new();
    let mut author_starts = 0;
    let mut prev_closed = true;
    let mut offset = 0;

    for line in section.split_inclusive('\n') {
        let line_start = offset;
        offset += line.len();
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if prev_closed && AUTHOR_START_RE.is_match(trimmed) {
            bounds.push(line_start);
            author_starts += 1;
        } else if bounds.is_empty() {
            // Text ahead of the first author line forms its own entry
            bounds.push(line_start);
        }
        prev_closed = trimmed.ends_with('.') || trimmed.ends_with(|c: char| c.is_ascii_digit());
    }

    let spans: Vec<Range<usize>> = bounds
        .iter()
        .enumerate()
        .map(|(i, &start)| start..bounds.get(i + 1).copied().unwrap_or(section.len()))
        .collect();

    let with_year = spans
        .iter()
        .filter(|span| YEAR_IN_LINE_RE.is_match(&section[(*span).clone()]))
        .count();
    if author_starts >= 2 && with_year * 2 >= spans.len() {
        Some(spans)
    } else {
        None
    }
}

fn split_blank_lines(section: &str) -> Vec<Range<usize>> {
    static RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n").expect("valid blank-line regex"));
    let mut spans = Vec::new();
    let mut start = 0;
    for gap in RE.find_iter(section) {
        spans.push(start..gap.start());
        start = gap.end();
    }
    spans.push(start..section.len());
    spans.retain(|span| !section[span.clone()].trim().is_empty());
    spans
}

/// Join hyphenated line breaks and collapse whitespace.
fn normalize_entry(entry: &str) -> String {
    static HYPHEN_BREAK: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"([a-z])-\s*\n\s*([a-z])").expect("valid hyphen regex"));
    let joined = HYPHEN_BREAK.replace_all(entry, "$1$2");
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}
