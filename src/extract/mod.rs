//! Document text preparation: segmentation, budgeting, PDF text extraction.

pub mod budget;
pub mod pdf_text;
pub mod sections;

pub use budget::{BudgetedText, allocate_budget};
pub use pdf_text::{
    MIN_TEXT_CHARS, OcrEngine, TextQuality, assess_text_quality, extract_pdf_text,
    extract_text_layer, text_layer_acceptable,
};
pub use sections::{
    FULL_TEXT_SECTION, SectionedDocument, canonical_tag, segment_flat, segment_tagged,
};

use crate::acquire::AcquiredText;

/// Segments an acquired document, regardless of how it was obtained.
///
/// Pre-tagged sources (the structured full-text API) go through the tagged
/// path; unstructured sources (PDF text, abstracts) go through the flat-text
/// heuristic. Pure function: the same [`AcquiredText`] always segments to
/// the same [`SectionedDocument`].
#[must_use]
pub fn segment(acquired: &AcquiredText) -> SectionedDocument {
    if acquired.section_map.is_empty() {
        segment_flat(acquired.identifier.clone(), &acquired.raw_text)
    } else {
        segment_tagged(acquired.identifier.clone(), &acquired.section_map)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::acquire::TextSource;
    use crate::record::DocumentIdentifier;

    fn id() -> DocumentIdentifier {
        DocumentIdentifier::from_pmid("12345678").unwrap()
    }

    #[test]
    fn test_segment_dispatches_on_section_map() {
        let tagged = AcquiredText::new(
            id(),
            "ignored raw text".to_string(),
            TextSource::StructuredApi,
            vec![("ABSTRACT".to_string(), "Tagged abstract body.".to_string())],
        );
        let doc = segment(&tagged);
        assert_eq!(doc.section("abstract"), Some("Tagged abstract body."));

        let flat = AcquiredText::new(
            id(),
            "Abstract\nFlat abstract body that is long enough to keep.".to_string(),
            TextSource::PdfRepository,
            Vec::new(),
        );
        let doc = segment(&flat);
        assert!(doc.section("abstract").unwrap().contains("Flat abstract"));
    }

    #[test]
    fn test_segment_is_deterministic() {
        let acquired = AcquiredText::new(
            id(),
            "Abstract\nSame body every time, long enough to be kept.".to_string(),
            TextSource::AbstractFallback,
            Vec::new(),
        );
        assert_eq!(segment(&acquired), segment(&acquired));
    }
}
