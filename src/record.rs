//! Document identifiers and bibliographic records.
//!
//! A [`DocumentIdentifier`] is the join key carried through every pipeline
//! stage; a [`PaperRecord`] is the bibliographic metadata fetched for one
//! identifier before full-text acquisition begins.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error for identifier contract violations.
///
/// Raised at construction time so a malformed identifier fails fast instead
/// of surfacing as an empty result deep inside the pipeline.
#[derive(Debug, Error)]
pub enum IdentifierError {
    /// None of pmid, doi, or title were provided.
    #[error("document identifier requires at least one of pmid, doi, or title")]
    Empty,
}

/// Immutable identifier for one document.
///
/// At least one of `pmid`, `doi`, or `title` must be present. The identifier
/// never changes after construction; re-fetching a document produces new
/// result values keyed by the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentIdentifier {
    /// PubMed identifier, when known.
    pub pmid: Option<String>,
    /// Digital Object Identifier, when known.
    pub doi: Option<String>,
    /// Document title (may be empty if pmid or doi is present).
    pub title: String,
}

impl DocumentIdentifier {
    /// Creates an identifier, enforcing the at-least-one-field contract.
    ///
    /// Empty strings are normalized to `None` for pmid/doi.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::Empty`] if every field is empty.
    pub fn new(
        pmid: Option<String>,
        doi: Option<String>,
        title: impl Into<String>,
    ) -> Result<Self, IdentifierError> {
        let pmid = pmid.filter(|p| !p.trim().is_empty());
        let doi = doi.filter(|d| !d.trim().is_empty());
        let title = title.into();

        if pmid.is_none() && doi.is_none() && title.trim().is_empty() {
            return Err(IdentifierError::Empty);
        }

        Ok(Self { pmid, doi, title })
    }

    /// Creates an identifier from a bare PMID.
    ///
    /// # Errors
    ///
    /// Returns [`IdentifierError::Empty`] if the pmid is empty.
    pub fn from_pmid(pmid: impl Into<String>) -> Result<Self, IdentifierError> {
        Self::new(Some(pmid.into()), None, "")
    }

    /// Returns the most specific key available for logging and sorting.
    #[must_use]
    pub fn display_key(&self) -> &str {
        if let Some(pmid) = &self.pmid {
            return pmid;
        }
        if let Some(doi) = &self.doi {
            return doi;
        }
        &self.title
    }
}

/// Bibliographic metadata for one paper, as fetched from the metadata source.
///
/// The abstract is carried here because it doubles as the guaranteed last
/// resort of full-text acquisition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaperRecord {
    /// Identifier joining this record to every downstream result.
    pub identifier: DocumentIdentifier,
    /// Abstract text; empty when the record has none.
    pub abstract_text: String,
    /// Journal name.
    pub journal: String,
    /// Publication year as printed in the record (may be empty).
    pub year: String,
    /// Full publication date string when available.
    pub publication_date: String,
    /// Author names in record order.
    pub authors: Vec<String>,
}

impl Default for DocumentIdentifier {
    fn default() -> Self {
        Self {
            pmid: None,
            doi: None,
            title: String::new(),
        }
    }
}

impl PaperRecord {
    /// Creates a record carrying only an identifier.
    #[must_use]
    pub fn from_identifier(identifier: DocumentIdentifier) -> Self {
        Self {
            identifier,
            ..Self::default()
        }
    }

    /// Returns true if the record carries a usable abstract.
    #[must_use]
    pub fn has_abstract(&self) -> bool {
        let trimmed = self.abstract_text.trim();
        !trimmed.is_empty() && trimmed != "NA"
    }
}
