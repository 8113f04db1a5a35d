//! Shared fixtures for integration tests.

#![allow(dead_code)]

use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use pubminer_core::record::{DocumentIdentifier, PaperRecord};
use serde_json::json;

/// Builds a real single-page PDF whose text layer carries `words` repeated
/// prose, dense enough to pass the text-quality gate.
pub fn text_pdf(words: usize) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("Td", vec![50.into(), 700.into()]),
    ];
    let line = "research words ".repeat(8);
    for _ in 0..words.div_ceil(8) {
        operations.push(Operation::new(
            "Tj",
            vec![Object::string_literal(line.as_str())],
        ));
        operations.push(Operation::new("Td", vec![0.into(), (-14).into()]));
    }
    operations.push(Operation::new("ET", vec![]));

    let content = Content { operations };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().expect("content encodes"),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("pdf serializes");
    // Clear the minimum-size floor regardless of how small the body came out
    while bytes.len() < 2048 {
        bytes.extend_from_slice(b"%padding-comment\n");
    }
    bytes
}

/// A 500-byte body with a PDF signature: fails the size floor.
pub fn undersized_pdf() -> Vec<u8> {
    let mut bytes = b"%PDF-1.5\n".to_vec();
    bytes.resize(500, b'x');
    bytes
}

/// A BioC response body with the given tagged passages.
pub fn bioc_body(passages: &[(&str, &str)]) -> serde_json::Value {
    let passages: Vec<serde_json::Value> = passages
        .iter()
        .map(|(section, text)| {
            json!({
                "infons": {"section_type": section},
                "text": text,
            })
        })
        .collect();
    json!([{"documents": [{"passages": passages}]}])
}

/// A paper record with the given identifiers and abstract.
pub fn record(pmid: Option<&str>, doi: Option<&str>, title: &str, abstract_text: &str) -> PaperRecord {
    let identifier = DocumentIdentifier::new(
        pmid.map(str::to_string),
        doi.map(str::to_string),
        title,
    )
    .expect("test identifier is valid");
    let mut record = PaperRecord::from_identifier(identifier);
    record.abstract_text = abstract_text.to_string();
    record
}
