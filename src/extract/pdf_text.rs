//! Text extraction from downloaded PDFs.
//!
//! The direct text layer is tried first; when the extracted text is too
//! sparse to be a real text layer (scanned documents mostly), an injected
//! OCR engine takes over. Density is judged by non-whitespace character
//! count and by how much of the text is CJK or Latin alphabetic.
//!
//! Extraction is CPU-bound and runs inside `spawn_blocking`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, instrument, warn};

/// Minimum effective (non-whitespace) characters for a usable text layer.
pub const MIN_TEXT_CHARS: usize = 1_000;

/// Pluggable OCR engine, injected by the caller.
///
/// No OCR backend ships with the crate; the pipeline only owns the decision
/// of *when* to fall back to OCR. Implementations are expected to be
/// blocking and are invoked from a blocking task.
pub trait OcrEngine: Send + Sync {
    /// Recognizes text from a PDF file on disk.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when recognition fails.
    fn recognize(&self, pdf_path: &Path) -> Result<String, String>;
}

/// Character-density measurements over extracted text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextQuality {
    /// Non-whitespace character count.
    pub effective_chars: usize,
    /// CJK ideograph count.
    pub cjk_chars: usize,
    /// ASCII alphabetic character count.
    pub latin_chars: usize,
}

/// Measures extraction quality for the OCR decision.
#[must_use]
pub fn assess_text_quality(text: &str) -> TextQuality {
    let mut quality = TextQuality {
        effective_chars: 0,
        cjk_chars: 0,
        latin_chars: 0,
    };
    for c in text.chars() {
        if !c.is_whitespace() {
            quality.effective_chars += 1;
        }
        if ('\u{4e00}'..='\u{9fff}').contains(&c) {
            quality.cjk_chars += 1;
        } else if c.is_ascii_alphabetic() {
            quality.latin_chars += 1;
        }
    }
    quality
}

/// Decides whether a text layer is dense enough to skip OCR.
///
/// Accepts when the effective character count clears `min_chars`, or when a
/// shorter text is still clearly running prose (enough CJK or Latin
/// alphabetic characters).
#[must_use]
pub fn text_layer_acceptable(quality: TextQuality, min_chars: usize) -> bool {
    quality.effective_chars >= min_chars
        || (quality.effective_chars > 500
            && (quality.cjk_chars > 100 || quality.latin_chars > 300))
}

/// Extracts the text layer from PDF bytes with lopdf.
///
/// # Errors
///
/// Returns a reason string when the PDF cannot be parsed or yields no text.
pub fn extract_text_layer(bytes: &[u8]) -> Result<String, String> {
    let document =
        lopdf::Document::load_mem(bytes).map_err(|e| format!("unreadable PDF: {e}"))?;
    let pages: Vec<u32> = document.get_pages().keys().copied().collect();
    if pages.is_empty() {
        return Err("PDF has no pages".to_string());
    }
    document
        .extract_text(&pages)
        .map_err(|e| format!("text extraction failed: {e}"))
}

/// Extracts text from a downloaded PDF, with OCR fallback on sparse layers.
///
/// The direct text layer is extracted first; if its density fails the
/// [`text_layer_acceptable`] check, the injected OCR engine is consulted.
/// Without an engine, a sparse layer is a failure so the acquisition chain
/// can fall through to its next source.
///
/// # Errors
///
/// Returns a reason string when neither the text layer nor OCR produced
/// usable text.
#[instrument(skip(bytes, ocr), fields(path = %pdf_path.display(), size = bytes.len()))]
pub async fn extract_pdf_text(
    pdf_path: &Path,
    bytes: &[u8],
    min_chars: usize,
    ocr: Option<Arc<dyn OcrEngine>>,
) -> Result<String, String> {
    let owned_bytes = bytes.to_vec();
    let layer = tokio::task::spawn_blocking(move || extract_text_layer(&owned_bytes))
        .await
        .map_err(|e| format!("extraction task failed: {e}"))??;

    let quality = assess_text_quality(&layer);
    debug!(
        effective = quality.effective_chars,
        cjk = quality.cjk_chars,
        latin = quality.latin_chars,
        "text layer extracted"
    );

    if text_layer_acceptable(quality, min_chars) {
        return Ok(layer);
    }

    let Some(engine) = ocr else {
        warn!(
            effective = quality.effective_chars,
            "text layer too sparse and no OCR engine configured"
        );
        return Err(format!(
            "text layer too sparse ({} effective chars) and no OCR engine available",
            quality.effective_chars
        ));
    };

    debug!("text layer too sparse, running OCR");
    let path: PathBuf = pdf_path.to_path_buf();
    let recognized = tokio::task::spawn_blocking(move || engine.recognize(&path))
        .await
        .map_err(|e| format!("OCR task failed: {e}"))??;

    if recognized.trim().is_empty() {
        return Err("OCR produced no text".to_string());
    }
    Ok(recognized)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct FixedOcr(&'static str);

    impl OcrEngine for FixedOcr {
        fn recognize(&self, _pdf_path: &Path) -> Result<String, String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingOcr;

    impl OcrEngine for FailingOcr {
        fn recognize(&self, _pdf_path: &Path) -> Result<String, String> {
            Err("tesseract not installed".to_string())
        }
    }

    /// Minimal one-page PDF with no real text layer.
    fn sparse_pdf() -> Vec<u8> {
        use lopdf::dictionary;
        use lopdf::{Document, Object, Stream};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content = Stream::new(dictionary! {}, b"BT ET".to_vec());
        let content_id = doc.add_object(content);
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
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
        doc.save_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_quality_counts_effective_and_alphabetic() {
        let quality = assess_text_quality("ab c 12\n文字");
        assert_eq!(quality.effective_chars, 7);
        assert_eq!(quality.cjk_chars, 2);
        assert_eq!(quality.latin_chars, 3);
    }

    #[test]
    fn test_acceptable_when_over_min_chars() {
        let text = "x".repeat(1_200);
        assert!(text_layer_acceptable(assess_text_quality(&text), 1_000));
    }

    #[test]
    fn test_acceptable_short_latin_prose() {
        // 600 effective chars, mostly alphabetic: acceptable below min_chars
        let text = "word ".repeat(150);
        let quality = assess_text_quality(&text);
        assert!(quality.effective_chars < 1_000);
        assert!(text_layer_acceptable(quality, 1_000));
    }

    #[test]
    fn test_unacceptable_sparse_symbols() {
        // Plenty of characters but not prose
        let text = ". ".repeat(400);
        assert!(!text_layer_acceptable(assess_text_quality(&text), 1_000));
    }

    #[test]
    fn test_extract_text_layer_rejects_garbage() {
        assert!(extract_text_layer(b"not a pdf at all").is_err());
    }

    #[tokio::test]
    async fn test_sparse_layer_without_ocr_fails() {
        let bytes = sparse_pdf();
        let result =
            extract_pdf_text(Path::new("/tmp/sparse.pdf"), &bytes, MIN_TEXT_CHARS, None).await;
        assert!(result.unwrap_err().contains("no OCR engine"));
    }

    #[tokio::test]
    async fn test_sparse_layer_falls_back_to_ocr() {
        let bytes = sparse_pdf();
        let ocr: Arc<dyn OcrEngine> = Arc::new(FixedOcr("Recognized page text."));
        let result = extract_pdf_text(
            Path::new("/tmp/sparse.pdf"),
            &bytes,
            MIN_TEXT_CHARS,
            Some(ocr),
        )
        .await
        .unwrap();
        assert_eq!(result, "Recognized page text.");
    }

    #[tokio::test]
    async fn test_ocr_failure_propagates_reason() {
        let bytes = sparse_pdf();
        let ocr: Arc<dyn OcrEngine> = Arc::new(FailingOcr);
        let result = extract_pdf_text(
            Path::new("/tmp/sparse.pdf"),
            &bytes,
            MIN_TEXT_CHARS,
            Some(ocr),
        )
        .await;
        assert!(result.unwrap_err().contains("tesseract"));
    }
}
