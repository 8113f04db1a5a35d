//! Section segmentation for acquired documents.
//!
//! Turns a raw document into named sections, independent of where the text
//! came from. Two input modes are supported:
//!
//! - **Tagged passages** (from the structured full-text API) are grouped by
//!   their existing section tag, de-duplicated, and ordered by a fixed
//!   priority table.
//! - **Flat text** (from PDFs or abstracts) is segmented heuristically by
//!   scanning for section headings alone on their own line, using a synonym
//!   table per canonical section name.
//!
//! Segmentation is a pure function: the same input always yields the same
//! [`SectionedDocument`].

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};

use crate::record::DocumentIdentifier;

/// Name of the synthetic section used when no headings are found.
pub const FULL_TEXT_SECTION: &str = "full_text";

/// Minimum span length for a heuristic section to be kept; shorter matches
/// are treated as false positives.
const MIN_SECTION_LENGTH: usize = 20;

/// Canonical section ordering used for tagged passages.
const SECTION_PRIORITY: [&str; 12] = [
    "title",
    "abstract",
    "introduction",
    "methods",
    "results",
    "discussion",
    "conclusion",
    "acknowledgments",
    "references",
    "figures",
    "tables",
    "supplementary",
];

/// Synonym patterns per canonical section name for flat-text scanning.
///
/// "summary" intentionally appears under both abstract and conclusion, as
/// papers use it for either; a double match at one offset yields an empty
/// span for the loser, which the minimum-length filter discards.
const SECTION_SYNONYMS: [(&str, &[&str]); 8] = [
    ("abstract", &["abstract", "summary"]),
    (
        "introduction",
        &["introduction", "background", "objectives?", "aims?"],
    ),
    (
        "methods",
        &[
            "materials and methods",
            "methods?",
            "methodology",
            "study design",
            "experimental procedures",
        ],
    ),
    ("results", &["results?", "findings", "outcomes", "observations"]),
    ("discussion", &["discussion", "interpretation", "analysis"]),
    ("conclusion", &["conclusions?", "summary", "final remarks"]),
    (
        "acknowledgments",
        &["acknowledge?ments?", "funding", "support"],
    ),
    ("references", &["references", "bibliography"]),
];

/// Compiled heading regexes, one per (canonical name, synonym pattern).
static HEADING_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    let mut compiled = Vec::new();
    for (name, patterns) in SECTION_SYNONYMS {
        for pattern in patterns {
            // Heading alone on its own line, optionally followed by : or .
            let regex = format!(r"(?mi)^[ \t]*{pattern}[ \t]*[:.]?[ \t]*$");
            #[allow(clippy::expect_used)]
            compiled.push((
                name,
                Regex::new(&regex).expect("static heading pattern must compile"),
            ));
        }
    }
    compiled
});

/// A document split into named sections.
///
/// `sections` is an ordered name-to-text mapping; `section_order` lists the
/// names in their classification order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionedDocument {
    /// Identifier joining this document to its pipeline record.
    pub identifier: DocumentIdentifier,
    /// Ordered (name, text) pairs.
    pub sections: Vec<(String, String)>,
    /// Section names in order, mirroring `sections`.
    pub section_order: Vec<String>,
}

impl SectionedDocument {
    fn new(identifier: DocumentIdentifier, sections: Vec<(String, String)>) -> Self {
        let section_order = sections.iter().map(|(name, _)| name.clone()).collect();
        Self {
            identifier,
            sections,
            section_order,
        }
    }

    /// Looks up a section body by name.
    #[must_use]
    pub fn section(&self, name: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, text)| text.as_str())
    }

    /// Total length of all section bodies.
    #[must_use]
    pub fn total_length(&self) -> usize {
        self.sections.iter().map(|(_, text)| text.len()).sum()
    }

    /// True when segmentation found no headings and fell back to one
    /// synthetic whole-document section.
    #[must_use]
    pub fn is_unsegmented(&self) -> bool {
        self.sections.len() == 1 && self.sections[0].0 == FULL_TEXT_SECTION
    }
}

/// Maps a structured-API section tag to its canonical name.
///
/// Unknown tags come back lowercased so they can still be carried through in
/// first-seen order.
#[must_use]
pub fn canonical_tag(tag: &str) -> String {
    match tag.to_ascii_uppercase().as_str() {
        "TITLE" => "title".to_string(),
        "ABSTRACT" => "abstract".to_string(),
        "INTRO" | "INTRODUCTION" => "introduction".to_string(),
        "METHODS" | "METHOD" => "methods".to_string(),
        "RESULTS" | "RESULT" => "results".to_string(),
        "DISCUSS" | "DISCUSSION" => "discussion".to_string(),
        "CONCL" | "CONCLUSION" | "CONCLUSIONS" => "conclusion".to_string(),
        "ACK_FUND" | "ACKNOWLEDGMENTS" => "acknowledgments".to_string(),
        "REF" | "REFERENCES" => "references".to_string(),
        "FIG" | "FIGURE" => "figures".to_string(),
        "TABLE" => "tables".to_string(),
        "SUPPL" | "SUPPLEMENTARY" => "supplementary".to_string(),
        other => other.to_ascii_lowercase(),
    }
}

/// Segments pre-tagged passages from the structured full-text API.
///
/// Passages are grouped by canonical tag, duplicate passage texts within a
/// tag are dropped, and groups are emitted in the fixed priority order with
/// unrecognized tags appended in first-seen order.
#[must_use]
#[instrument(skip(passages), fields(passages = passages.len()))]
pub fn segment_tagged(
    identifier: DocumentIdentifier,
    passages: &[(String, String)],
) -> SectionedDocument {
    // Group passage texts by canonical tag, preserving first-seen tag order
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (tag, text) in passages {
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        let name = canonical_tag(tag);
        match grouped.iter_mut().find(|(n, _)| *n == name) {
            Some((_, texts)) => {
                if !texts.iter().any(|t| t == text) {
                    texts.push(text.to_string());
                }
            }
            None => grouped.push((name, vec![text.to_string()])),
        }
    }

    // Emit priority sections first, then unrecognized tags in first-seen order
    let mut sections: Vec<(String, String)> = Vec::new();
    for priority_name in SECTION_PRIORITY {
        if let Some(position) = grouped.iter().position(|(n, _)| n == priority_name) {
            let (name, texts) = grouped.remove(position);
            sections.push((name, texts.join("\n\n")));
        }
    }
    for (name, texts) in grouped {
        sections.push((name, texts.join("\n\n")));
    }

    debug!(sections = sections.len(), "segmented tagged passages");
    SectionedDocument::new(identifier, sections)
}

/// Segments flat text by scanning for section headings.
///
/// Line endings are normalized and blank runs collapsed, every synonym
/// pattern is matched against its own line, matches are sorted by offset,
/// and the text between consecutive matches becomes a section body (heading
/// line included). Spans at or below the minimum length are discarded as
/// false positives. When nothing matches, the whole text becomes one
/// synthetic [`FULL_TEXT_SECTION`].
#[must_use]
#[instrument(skip(text), fields(len = text.len()))]
pub fn segment_flat(identifier: DocumentIdentifier, text: &str) -> SectionedDocument {
    let normalized = normalize_text(text);

    // Locate every heading occurrence
    let mut matches: Vec<(&'static str, usize)> = Vec::new();
    for (name, regex) in HEADING_PATTERNS.iter() {
        for found in regex.find_iter(&normalized) {
            matches.push((name, found.start()));
        }
    }

    if matches.is_empty() {
        let body = normalized.trim();
        if body.is_empty() {
            return SectionedDocument::new(identifier, Vec::new());
        }
        return SectionedDocument::new(
            identifier,
            vec![(FULL_TEXT_SECTION.to_string(), body.to_string())],
        );
    }

    matches.sort_by_key(|(_, offset)| *offset);

    // Slice between consecutive matches; later occurrences of a name win
    let mut sections: Vec<(String, String)> = Vec::new();
    for (index, (name, start)) in matches.iter().enumerate() {
        let end = matches
            .get(index + 1)
            .map_or(normalized.len(), |(_, next)| *next);
        let body = normalized[*start..end].trim();
        if body.len() <= MIN_SECTION_LENGTH {
            continue;
        }
        match sections.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = body.to_string(),
            None => sections.push(((*name).to_string(), body.to_string())),
        }
    }

    if sections.is_empty() {
        let body = normalized.trim();
        return SectionedDocument::new(
            identifier,
            vec![(FULL_TEXT_SECTION.to_string(), body.to_string())],
        );
    }

    debug!(sections = sections.len(), "segmented flat text");
    SectionedDocument::new(identifier, sections)
}

/// Normalizes line endings and collapses runs of blank lines.
fn normalize_text(text: &str) -> String {
    #[allow(clippy::expect_used)]
    static BLANK_RUN: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("static pattern must compile"));
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    BLANK_RUN.replace_all(&unified, "\n\n").into_owned()
}
