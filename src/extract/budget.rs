//! Character budgeting for prompt text.
//!
//! Given a segmented document and an optional budget, produces a bounded
//! string ready for LLM consumption. Selection is a greedy, priority-first
//! walk: whole high-priority sections are included while they fit, the first
//! section that does not fit is truncated to exactly fill the remaining
//! budget (or skipped when too little room remains), and everything after it
//! is dropped. Deterministic and explainable rather than globally optimal.

use tracing::{debug, instrument};

use super::sections::SectionedDocument;
use crate::record::DocumentIdentifier;

/// Priority order under budget pressure; sections outside this list are
/// never included once the budget is exceeded.
const BUDGET_PRIORITY: [&str; 6] = [
    "abstract",
    "introduction",
    "methods",
    "results",
    "discussion",
    "conclusion",
];

/// Minimum useful length for a truncated section inclusion.
const MIN_TRUNCATED_LENGTH: usize = 100;

/// Marker inserted between head and tail in the unsegmented fallback.
const ELISION_MARKER: &str = "\n\n[... content omitted ...]\n\n";

/// Cap on the head slice of the unsegmented fallback.
const HEAD_CAP: usize = 5_000;

/// Cap on the tail slice of the unsegmented fallback.
const TAIL_CAP: usize = 3_000;

/// Budget-bounded prompt text for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetedText {
    /// Identifier joining this text to its pipeline record.
    pub identifier: DocumentIdentifier,
    /// The prompt-ready text.
    pub text: String,
    /// Included section names with a truncation flag each.
    pub included_sections: Vec<(String, bool)>,
    /// Length of `text` in bytes; never exceeds the budget when one is set.
    pub total_length: usize,
}

/// Renders one section header.
fn section_header(name: &str) -> String {
    format!("\n\n===== {} =====\n", name.to_uppercase())
}

/// Renders sections with headers, in the given order.
fn render(sections: &[(String, String)]) -> String {
    let mut out = String::new();
    for (name, body) in sections {
        out.push_str(&section_header(name));
        out.push_str(body);
    }
    out.trim_start().to_string()
}

/// Truncates a string to at most `max` bytes on a char boundary.
fn truncate_to_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Takes at most `max` bytes from the end of a string, on a char boundary.
fn tail_to_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

/// Produces budget-bounded prompt text from a segmented document.
///
/// With `max_length = None` the full rendering is returned unbounded. With a
/// budget:
///
/// 1. If the full rendering already fits, it is returned unmodified (section
///    bodies round-trip exactly; only headers are added).
/// 2. If the document has no identified sections, a head/tail slice of the
///    whole text joined by an elision marker is returned.
/// 3. Otherwise the greedy priority walk selects and truncates sections. If
///    even the first viable section cannot meet the minimum truncation
///    length, the result degrades to a head slice of the priority-ordered
///    bodies so a small budget still yields the highest-priority content.
///
/// The returned `total_length` never exceeds the budget.
#[must_use]
#[instrument(skip(document), fields(id = %document.identifier.display_key()))]
pub fn allocate_budget(
    document: &SectionedDocument,
    max_length: Option<usize>,
) -> BudgetedText {
    let rendered = render(&document.sections);
    let identifier = document.identifier.clone();

    let Some(budget) = max_length else {
        let included = document
            .section_order
            .iter()
            .map(|name| (name.clone(), false))
            .collect();
        let total_length = rendered.len();
        return BudgetedText {
            identifier,
            text: rendered,
            included_sections: included,
            total_length,
        };
    };

    if rendered.len() <= budget {
        let included = document
            .section_order
            .iter()
            .map(|name| (name.clone(), false))
            .collect();
        let total_length = rendered.len();
        return BudgetedText {
            identifier,
            text: rendered,
            included_sections: included,
            total_length,
        };
    }

    debug!(
        rendered = rendered.len(),
        budget, "text over budget, selecting sections"
    );

    if document.sections.is_empty() || document.is_unsegmented() {
        let whole = document
            .sections
            .first()
            .map_or("", |(_, body)| body.as_str());
        let text = head_tail_slice(whole, budget);
        let total_length = text.len();
        return BudgetedText {
            identifier,
            text,
            included_sections: vec![(
                super::sections::FULL_TEXT_SECTION.to_string(),
                true,
            )],
            total_length,
        };
    }

    let mut out = String::new();
    let mut included: Vec<(String, bool)> = Vec::new();

    for priority_name in BUDGET_PRIORITY {
        let Some(body) = document.section(priority_name) else {
            continue;
        };
        let header = section_header(priority_name);
        let whole_cost = header.len() + body.len();

        if out.len() + whole_cost <= budget {
            out.push_str(&header);
            out.push_str(body);
            included.push((priority_name.to_string(), false));
            continue;
        }

        // Partial inclusion: fill exactly what remains, if it is worth it
        let remaining = budget.saturating_sub(out.len() + header.len());
        if remaining >= MIN_TRUNCATED_LENGTH {
            let keep = truncate_to_boundary(body, remaining.saturating_sub(3));
            out.push_str(&header);
            out.push_str(keep);
            out.push_str("...");
            included.push((priority_name.to_string(), true));
        }
        break;
    }

    if included.is_empty() {
        // Budget below any viable truncation: degrade to a head slice of the
        // priority-ordered bodies so the highest-priority content survives.
        let prioritized: Vec<&str> = BUDGET_PRIORITY
            .iter()
            .filter_map(|name| document.section(name))
            .collect();
        let joined = prioritized.join("\n\n");
        let text = truncate_to_boundary(&joined, budget).trim_end().to_string();
        let first = BUDGET_PRIORITY
            .iter()
            .find(|name| document.section(name).is_some());
        let included = first
            .map(|name| vec![((*name).to_string(), true)])
            .unwrap_or_default();
        let total_length = text.len();
        return BudgetedText {
            identifier,
            text,
            included_sections: included,
            total_length,
        };
    }

    let text = out.trim_start().to_string();
    let total_length = text.len();
    debug!(total_length, sections = included.len(), "budget allocation complete");
    BudgetedText {
        identifier,
        text,
        included_sections: included,
        total_length,
    }
}

/// Head/tail truncation for text with no identifiable sections.
fn head_tail_slice(text: &str, budget: usize) -> String {
    let head_len = (budget / 3).min(HEAD_CAP);
    let marker_len = ELISION_MARKER.len();

    if budget <= head_len + marker_len {
        return truncate_to_boundary(text, budget).to_string();
    }

    let tail_len = budget.saturating_sub(head_len + marker_len).min(TAIL_CAP);
    let head = truncate_to_boundary(text, head_len);
    let tail = tail_to_boundary(text, tail_len);

    let mut out = String::with_capacity(head.len() + marker_len + tail.len());
    out.push_str(head);
    out.push_str(ELISION_MARKER);
    out.push_str(tail);
    debug_assert!(out.len() <= budget);
    out
}
