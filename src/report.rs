//! Tabular report writing.
//!
//! Consumes settled per-record results plus the extraction schema and
//! produces a CSV artifact. Column order is fixed: the metadata columns
//! first, then one column per schema field in schema order. Cell content is
//! cleaned of characters that break tabular consumers.

use std::path::Path;

use thiserror::Error;
use tracing::{info, instrument};

use crate::analyze::FieldSchema;
use crate::pipeline::DocumentResult;

/// Fixed metadata columns, always first and always in this order.
pub const METADATA_COLUMNS: [&str; 9] = [
    "pmid",
    "doi",
    "title",
    "journal",
    "year",
    "authors",
    "text_source",
    "text_length",
    "status",
];

/// Trailing column carrying the optional error detail.
pub const ERROR_COLUMN: &str = "error";

/// Errors raised while writing a report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The CSV writer failed.
    #[error("failed to write report: {0}")]
    Csv(#[from] csv::Error),
}

/// The report-writing seam.
pub trait ReportWriter {
    /// Writes results as a tabular artifact.
    ///
    /// # Errors
    ///
    /// Returns [`ReportError`] when the artifact cannot be produced.
    fn write(&self, results: &[DocumentResult], schema: &FieldSchema)
    -> Result<(), ReportError>;
}

/// CSV report writer.
#[derive(Debug)]
pub struct CsvReportWriter {
    path: std::path::PathBuf,
}

impl CsvReportWriter {
    /// Creates a writer targeting one output file.
    #[must_use]
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Builds the full header row for a schema.
    #[must_use]
    pub fn header(schema: &FieldSchema) -> Vec<String> {
        let mut header: Vec<String> = METADATA_COLUMNS.iter().map(|c| (*c).to_string()).collect();
        header.extend(schema.fields.iter().map(|f| f.key.clone()));
        header.push(ERROR_COLUMN.to_string());
        header
    }
}

/// Cleans one cell: newlines become spaces, stray semicolons become commas.
#[must_use]
pub fn clean_cell(content: &str) -> String {
    content
        .replace(['\n', '\r'], " ")
        .replace(';', ",")
        .trim()
        .to_string()
}

fn row_for(result: &DocumentResult, schema: &FieldSchema) -> Vec<String> {
    let record = &result.record;
    let mut row = vec![
        record.identifier.pmid.clone().unwrap_or_default(),
        record.identifier.doi.clone().unwrap_or_default(),
        clean_cell(&record.identifier.title),
        clean_cell(&record.journal),
        record.year.clone(),
        clean_cell(&record.authors.join(", ")),
        result.text_source.as_str().to_string(),
        result.text_length.to_string(),
        result.status.as_str().to_string(),
    ];
    for field in &schema.fields {
        row.push(clean_cell(
            result.fields.get(&field.key).map_or("", String::as_str),
        ));
    }
    row.push(clean_cell(result.error.as_deref().unwrap_or("")));
    row
}

impl ReportWriter for CsvReportWriter {
    #[instrument(skip(self, results, schema), fields(path = %self.path.display()))]
    fn write(
        &self,
        results: &[DocumentResult],
        schema: &FieldSchema,
    ) -> Result<(), ReportError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                ReportError::Csv(csv::Error::from(e))
            })?;
        }

        let mut writer = csv::Writer::from_path(&self.path)?;
        writer.write_record(Self::header(schema))?;
        for result in results {
            writer.write_record(row_for(result, schema))?;
        }
        writer.flush().map_err(csv::Error::from)?;

        info!(rows = results.len(), "report written");
        Ok(())
    }
}

/// Convenience for callers that only need the default writer.
///
/// # Errors
///
/// Returns [`ReportError`] when the artifact cannot be produced.
pub fn write_csv_report(
    path: &Path,
    results: &[DocumentResult],
    schema: &FieldSchema,
) -> Result<(), ReportError> {
    CsvReportWriter::new(path).write(results, schema)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::acquire::TextSource;
    use crate::analyze::FieldSpec;
    use crate::pipeline::ExtractionStatus;
    use crate::record::{DocumentIdentifier, PaperRecord};
    use std::collections::BTreeMap;

    fn schema() -> FieldSchema {
        FieldSchema {
            name: "test".to_string(),
            fields: vec![
                FieldSpec {
                    key: "study_type".to_string(),
                    name: "Study Type".to_string(),
                    description: String::new(),
                    required: false,
                },
                FieldSpec {
                    key: "sample_size".to_string(),
                    name: "Sample Size".to_string(),
                    description: String::new(),
                    required: false,
                },
            ],
        }
    }

    fn result() -> DocumentResult {
        let mut record = PaperRecord::from_identifier(
            DocumentIdentifier::new(
                Some("12345678".to_string()),
                Some("10.1/xyz".to_string()),
                "A Title\nWith Newline",
            )
            .unwrap(),
        );
        record.journal = "Journal of Examples".to_string();
        record.year = "2024".to_string();
        record.authors = vec!["Smith, John".to_string(), "Doe, Jane".to_string()];

        let mut fields = BTreeMap::new();
        fields.insert("study_type".to_string(), "RCT".to_string());
        fields.insert("sample_size".to_string(), "120".to_string());

        DocumentResult {
            index: 0,
            record,
            status: ExtractionStatus::Success,
            error: None,
            text_source: TextSource::StructuredApi,
            text_length: 9_000,
            fields,
        }
    }

    #[test]
    fn test_header_is_metadata_then_schema_then_error() {
        let header = CsvReportWriter::header(&schema());
        assert_eq!(&header[..9], METADATA_COLUMNS.map(String::from).as_slice());
        assert_eq!(header[9], "study_type");
        assert_eq!(header[10], "sample_size");
        assert_eq!(header[11], "error");
    }

    #[test]
    fn test_clean_cell_strips_breaking_characters() {
        assert_eq!(clean_cell("a\nb;c\r"), "a b,c");
        assert_eq!(clean_cell("  plain  "), "plain");
    }

    #[test]
    fn test_row_aligns_with_header() {
        let schema = schema();
        let row = row_for(&result(), &schema);
        assert_eq!(row.len(), CsvReportWriter::header(&schema).len());
        assert_eq!(row[0], "12345678");
        assert_eq!(row[2], "A Title With Newline");
        assert_eq!(row[6], "structured_api");
        assert_eq!(row[8], "success");
        assert_eq!(row[9], "RCT");
    }

    #[test]
    fn test_write_produces_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        let schema = schema();

        write_csv_report(&path, &[result()], &schema).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let mut lines = contents.lines();
        assert!(lines.next().unwrap().starts_with("pmid,doi,title"));
        let data = lines.next().unwrap();
        assert!(data.contains("12345678"));
        assert!(data.contains("RCT"));
    }

    #[test]
    fn test_missing_field_values_are_empty_cells() {
        let schema = schema();
        let mut r = result();
        r.fields.clear();
        r.status = ExtractionStatus::ApiError;
        r.error = Some("HTTP 500".to_string());

        let row = row_for(&r, &schema);
        assert_eq!(row[9], "");
        assert_eq!(row[10], "");
        assert_eq!(row[11], "HTTP 500");
    }
}
