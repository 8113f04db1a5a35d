//! Parser for the Medline flat-file record format.
//!
//! The metadata source's efetch endpoint returns records as tagged lines:
//! a four-character tag, a dash, and the value, with continuation lines
//! indented six spaces and records separated by blank lines.
//!
//! ```text
//! PMID- 12345678
//! TI  - A title that may wrap
//!       onto continuation lines
//! AB  - The abstract text.
//! FAU - Smith, John
//! AID - 10.1000/xyz [doi]
//! ```

use tracing::{debug, warn};

use crate::record::{DocumentIdentifier, PaperRecord};

/// One tagged field occurrence within a record.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TaggedField {
    tag: String,
    value: String,
}

/// Parses a Medline response body into paper records.
///
/// Records that carry no identifier at all are skipped with a warning
/// rather than failing the batch.
#[must_use]
pub fn parse_medline(text: &str) -> Vec<PaperRecord> {
    let mut records = Vec::new();
    for block in split_records(text) {
        let fields = parse_fields(&block);
        if fields.is_empty() {
            continue;
        }
        match build_record(&fields) {
            Some(record) => records.push(record),
            None => warn!("skipping Medline record with no usable identifier"),
        }
    }
    debug!(records = records.len(), "parsed Medline response");
    records
}

/// Splits the response into per-record blocks on blank-line boundaries.
fn split_records(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    normalized
        .split("\n\n")
        .map(str::trim_end)
        .filter(|block| !block.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Folds a record block's lines into tagged fields, joining continuations.
fn parse_fields(block: &str) -> Vec<TaggedField> {
    let mut fields: Vec<TaggedField> = Vec::new();
    for line in block.lines() {
        if let Some(continuation) = line.strip_prefix("      ") {
            // Continuation of the previous field
            if let Some(last) = fields.last_mut() {
                if !last.value.is_empty() {
                    last.value.push(' ');
                }
                last.value.push_str(continuation.trim());
            }
            continue;
        }

        // Tag lines look like "PMID- value" / "TI  - value"
        if line.get(4..6) == Some("- ") {
            fields.push(TaggedField {
                tag: line.get(..4).unwrap_or_default().trim().to_string(),
                value: line.get(6..).unwrap_or_default().trim().to_string(),
            });
        }
    }
    fields
}

/// Extracts a DOI from AID/LID values like `10.1000/xyz [doi]`.
fn doi_from_fields(fields: &[TaggedField]) -> Option<String> {
    fields
        .iter()
        .filter(|f| f.tag == "AID" || f.tag == "LID")
        .find(|f| f.value.to_lowercase().ends_with("[doi]"))
        .map(|f| f.value[..f.value.len() - 5].trim().to_string())
}

fn first_value<'a>(fields: &'a [TaggedField], tag: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|f| f.tag == tag)
        .map(|f| f.value.as_str())
}

fn build_record(fields: &[TaggedField]) -> Option<PaperRecord> {
    let pmid = first_value(fields, "PMID").map(str::to_string);
    let doi = doi_from_fields(fields);
    let title = first_value(fields, "TI").unwrap_or_default().to_string();

    let identifier = DocumentIdentifier::new(pmid, doi, title).ok()?;

    let publication_date = first_value(fields, "DP").unwrap_or_default().to_string();
    let year = publication_date
        .get(..4)
        .filter(|prefix| prefix.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or_default()
        .to_string();

    Some(PaperRecord {
        identifier,
        abstract_text: first_value(fields, "AB").unwrap_or_default().to_string(),
        journal: first_value(fields, "JT")
            .or_else(|| first_value(fields, "TA"))
            .unwrap_or_default()
            .to_string(),
        year,
        publication_date,
        authors: fields
            .iter()
            .filter(|f| f.tag == "FAU")
            .map(|f| f.value.clone())
            .collect(),
    })
}
