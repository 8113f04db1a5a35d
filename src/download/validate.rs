//! Validation of downloaded PDF artifacts.
//!
//! A downloaded file is only kept when it looks like a real, complete PDF:
//! correct magic bytes, size within configured bounds, and a parseable page
//! tree with at least one page. Anything else is discarded so partial or
//! interstitial HTML responses never reach text extraction.

use std::path::Path;

use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Minimum plausible size for a article PDF (1 KiB).
pub const MIN_PDF_SIZE: u64 = 1024;

/// PDF file signature.
const PDF_MAGIC: &[u8] = b"%PDF";

/// Reasons a downloaded artifact failed PDF validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PdfValidationError {
    /// File is below the plausible minimum size.
    #[error("file too small: {size} bytes (minimum {MIN_PDF_SIZE})")]
    TooSmall {
        /// Actual size in bytes.
        size: u64,
    },

    /// File exceeds the configured maximum size.
    #[error("file too large: {size} bytes (maximum {max})")]
    TooLarge {
        /// Actual size in bytes.
        size: u64,
        /// Configured cap in bytes.
        max: u64,
    },

    /// File does not start with the `%PDF` signature.
    #[error("missing PDF signature")]
    BadMagic,

    /// The PDF structure could not be parsed.
    #[error("unparseable PDF structure: {reason}")]
    Unparseable {
        /// Parser failure detail.
        reason: String,
    },

    /// The PDF parsed but contains no pages.
    #[error("PDF has no pages")]
    NoPages,
}

/// Summary of a validated PDF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdfInfo {
    /// File size in bytes.
    pub size: u64,
    /// Number of pages in the page tree.
    pub pages: usize,
}

/// Validates PDF bytes: signature, size bounds, and page count.
///
/// # Errors
///
/// Returns the first [`PdfValidationError`] encountered, checked in order of
/// increasing cost (size, magic bytes, structure).
#[instrument(skip(bytes), fields(size = bytes.len()))]
pub fn validate_pdf_bytes(bytes: &[u8], max_file_size: u64) -> Result<PdfInfo, PdfValidationError> {
    let size = bytes.len() as u64;

    if size < MIN_PDF_SIZE {
        return Err(PdfValidationError::TooSmall { size });
    }
    if size > max_file_size {
        return Err(PdfValidationError::TooLarge {
            size,
            max: max_file_size,
        });
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(PdfValidationError::BadMagic);
    }

    let document =
        lopdf::Document::load_mem(bytes).map_err(|e| PdfValidationError::Unparseable {
            reason: e.to_string(),
        })?;
    let pages = document.get_pages().len();
    if pages == 0 {
        return Err(PdfValidationError::NoPages);
    }

    debug!(pages, "PDF validated");
    Ok(PdfInfo { size, pages })
}

/// Writes downloaded bytes to disk, then validates the file in place.
///
/// A file that fails validation is deleted, not kept; the validation error is
/// returned so the stage can report failure and fall through.
///
/// # Errors
///
/// Returns an IO error string if the file cannot be written, or the
/// validation failure after the invalid file has been removed.
#[instrument(skip(bytes), fields(path = %path.display(), size = bytes.len()))]
pub async fn persist_validated_pdf(
    path: &Path,
    bytes: &[u8],
    max_file_size: u64,
) -> Result<PdfInfo, String> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
    }

    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| format!("cannot write {}: {e}", path.display()))?;

    match validate_pdf_bytes(bytes, max_file_size) {
        Ok(info) => Ok(info),
        Err(validation_error) => {
            if let Err(remove_error) = tokio::fs::remove_file(path).await {
                warn!(
                    path = %path.display(),
                    error = %remove_error,
                    "failed to delete invalid PDF"
                );
            } else {
                debug!(path = %path.display(), "deleted invalid PDF");
            }
            Err(validation_error.to_string())
        }
    }
}
