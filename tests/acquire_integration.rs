//! Integration tests for the full-text acquisition state machine.
//!
//! Exercises the ordered fallback chain against a mock server: structured
//! full text first, then open-access PDF repositories, then the mirror
//! pool, then abstract degradation. Stage short-circuiting is verified with
//! call-count expectations on the mocked later stages.

use std::sync::Arc;

use pubminer_core::acquire::{AcquirerEndpoints, FullTextAcquirer, TextSource};
use pubminer_core::config::{AcquireConfig, MirrorPoolConfig};
use pubminer_core::download::{HttpClient, RetryPolicy, ServiceRateLimiter};
use pubminer_core::mirror::MirrorHealthTracker;
use serde_json::json;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::{bioc_body, record, text_pdf, undersized_pdf};

/// Builds an acquirer wired entirely against one mock server.
fn acquirer_for(
    server: &MockServer,
    download_dir: &std::path::Path,
    mirrors: Vec<String>,
) -> (FullTextAcquirer, Arc<MirrorHealthTracker>) {
    let acquire_config = AcquireConfig {
        timeout_secs: 10,
        download_timeout_secs: 10,
        download_dir: download_dir.to_path_buf(),
        ..AcquireConfig::default()
    };
    let mirror_config = MirrorPoolConfig {
        mirrors,
        attempt_delay_ms: 0,
    };
    let tracker = Arc::new(MirrorHealthTracker::new(&mirror_config.mirrors));
    let client = HttpClient::new(
        std::time::Duration::from_secs(10),
        vec!["pubminer-tests/0.1".to_string()],
    );

    let acquirer = FullTextAcquirer::new(
        client,
        Arc::new(ServiceRateLimiter::unlimited()),
        RetryPolicy::with_max_attempts(3),
        Arc::clone(&tracker),
        &acquire_config,
        &mirror_config,
        AcquirerEndpoints::all_at(&server.uri()),
        None,
        None,
    );
    (acquirer, tracker)
}

/// Mounts expect(0) guards on every stage after the structured API.
async fn forbid_later_stages(server: &MockServer) {
    for prefix in ["crossref", "idconv", "render", "repo", "mirror"] {
        Mock::given(method("GET"))
            .and(path_regex(format!("^/{prefix}/.*")))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .named(format!("{prefix} must not be called"))
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_structured_success_short_circuits_all_later_stages() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/bioc/BioC_json/12345678/unicode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(bioc_body(&[
            ("TITLE", "A Structured Paper"),
            ("ABSTRACT", "The abstract body of the structured paper."),
            ("METHODS", "The methods body."),
        ])))
        .expect(1)
        .mount(&server)
        .await;
    forbid_later_stages(&server).await;

    let (acquirer, _) = acquirer_for(&server, dir.path(), Vec::new());
    let paper = record(Some("12345678"), Some("10.1/xyz"), "A Structured Paper", "");

    let outcome = acquirer.acquire(&paper).await;

    assert_eq!(outcome.text.source, TextSource::StructuredApi);
    assert!(!outcome.text.section_map.is_empty());
    assert!(outcome.text.raw_text.contains("abstract body"));
    assert!(outcome.attempts.iter().any(|a| {
        a.mirror_or_strategy == "structured-api" && a.success
    }));
}

#[tokio::test]
async fn test_structured_404_without_doi_degrades_to_abstract() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/bioc/BioC_json/12345678/unicode"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    // No DOI: PDF and mirror stages must never fire
    forbid_later_stages(&server).await;

    let (acquirer, _) = acquirer_for(&server, dir.path(), Vec::new());
    let paper = record(Some("12345678"), None, "A Paper", "A usable abstract body.");

    let outcome = acquirer.acquire(&paper).await;

    assert_eq!(outcome.text.source, TextSource::AbstractFallback);
    assert_eq!(
        outcome.text.raw_text,
        "Title: A Paper\n\nAbstract: A usable abstract body."
    );
}

#[tokio::test]
async fn test_structured_404_without_doi_or_abstract_is_none() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/bioc/BioC_json/12345678/unicode"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    forbid_later_stages(&server).await;

    let (acquirer, _) = acquirer_for(&server, dir.path(), Vec::new());
    let paper = record(Some("12345678"), None, "A Paper", "");

    let outcome = acquirer.acquire(&paper).await;

    assert_eq!(outcome.text.source, TextSource::None);
    assert!(outcome.text.raw_text.is_empty());
    // Not an error: the empty result is reported through attempts instead
    assert!(outcome.attempts.iter().any(|a| !a.success));
}

#[tokio::test]
async fn test_repository_stage_downloads_via_render_endpoint() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/bioc/BioC_json/12345678/unicode"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    // Crossref resolves the DOI to a repository identifier
    Mock::given(method("GET"))
        .and(path_regex("^/crossref/works/.*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {
                "license": [],
                "link": [{
                    "URL": "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC7654321/",
                    "content-type": "text/html"
                }]
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/render/backend/ptpmcrender.fcgi"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(text_pdf(120)),
        )
        .expect(1)
        .mount(&server)
        .await;
    // Mirror pool must not be touched once the repository stage succeeds
    Mock::given(method("GET"))
        .and(path_regex("^/mirror/.*"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let mirror = format!("{}/mirror", server.uri());
    let (acquirer, _) = acquirer_for(&server, dir.path(), vec![mirror]);
    let paper = record(Some("12345678"), Some("10.1/xyz"), "A Paper", "Fallback abstract.");

    let outcome = acquirer.acquire(&paper).await;

    assert_eq!(outcome.text.source, TextSource::PdfRepository);
    assert!(outcome.text.raw_text.contains("research words"));
    assert!(outcome.text.section_map.is_empty());
    assert!(outcome.attempts.iter().any(|a| {
        a.mirror_or_strategy == "direct-render" && a.success
    }));
    // The validated PDF was kept on disk
    assert!(dir.path().join("PMC7654321.pdf").exists());
}

#[tokio::test]
async fn test_undersized_pdf_is_rejected_and_chain_falls_through() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/bioc/BioC_json/12345678/unicode"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/crossref/works/.*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {
                "link": [{
                    "URL": "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC7654321/",
                    "content-type": "text/html"
                }]
            }
        })))
        .mount(&server)
        .await;
    // Every repository endpoint serves a 500-byte file below the 1 KiB floor
    Mock::given(method("GET"))
        .and(path_regex("^/render/.*"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(undersized_pdf()),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/repo/.*"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (acquirer, _) = acquirer_for(&server, dir.path(), Vec::new());
    let paper = record(Some("12345678"), Some("10.1/xyz"), "A Paper", "Fallback abstract.");

    let outcome = acquirer.acquire(&paper).await;

    // Validation failure: stage reports failure, pipeline proceeds
    assert_eq!(outcome.text.source, TextSource::AbstractFallback);
    assert!(outcome.attempts.iter().any(|a| {
        !a.success
            && a.error
                .as_deref()
                .is_some_and(|e| e.contains("too small"))
    }));
    // The invalid file was deleted, not kept
    assert!(!dir.path().join("PMC7654321.pdf").exists());
}

#[tokio::test]
async fn test_mirror_stage_downloads_when_repository_unavailable() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/bioc/BioC_json/12345678/unicode"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    // No open-access indicator anywhere
    Mock::given(method("GET"))
        .and(path_regex("^/crossref/.*"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/idconv/.*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": []})))
        .mount(&server)
        .await;
    // The mirror landing page embeds the served PDF
    Mock::given(method("GET"))
        .and(path("/mirror/files/doc.pdf"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(text_pdf(120)),
        )
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/mirror/.*"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><embed src="/mirror/files/doc.pdf"></body></html>"#,
        ))
        .mount(&server)
        .await;

    let mirror = format!("{}/mirror", server.uri());
    let (acquirer, tracker) = acquirer_for(&server, dir.path(), vec![mirror.clone()]);
    let paper = record(Some("12345678"), Some("10.1/xyz"), "A Paper", "Fallback abstract.");

    let outcome = acquirer.acquire(&paper).await;

    assert_eq!(outcome.text.source, TextSource::MirrorDownload);
    assert!(outcome.text.raw_text.contains("research words"));
    // Success was reported back to the health tracker
    let snapshot = tracker.snapshot();
    assert_eq!(snapshot[0].consecutive_failures, 0);
    assert!(snapshot[0].last_success.is_some());
}

#[tokio::test]
async fn test_failing_mirrors_are_reported_and_chain_degrades() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/bioc/BioC_json/12345678/unicode"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/crossref/.*"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/idconv/.*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"records": []})))
        .mount(&server)
        .await;
    // Both mirrors serve pages with no PDF link at all
    Mock::given(method("GET"))
        .and(path_regex("^/mirror-[ab]/.*"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><p>nope</p></html>"))
        .mount(&server)
        .await;

    let mirrors = vec![
        format!("{}/mirror-a", server.uri()),
        format!("{}/mirror-b", server.uri()),
    ];
    let (acquirer, tracker) = acquirer_for(&server, dir.path(), mirrors);
    let paper = record(Some("12345678"), Some("10.1/xyz"), "A Paper", "Fallback abstract.");

    let outcome = acquirer.acquire(&paper).await;

    assert_eq!(outcome.text.source, TextSource::AbstractFallback);
    // Every mirror took one failure report
    for record in tracker.snapshot() {
        assert_eq!(record.consecutive_failures, 1);
    }
}

#[tokio::test]
async fn test_interstitial_html_at_pdf_url_is_retried_once() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/bioc/BioC_json/12345678/unicode"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex("^/crossref/works/.*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "message": {
                "link": [{
                    "URL": "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC7654321/",
                    "content-type": "text/html"
                }]
            }
        })))
        .mount(&server)
        .await;
    // First hit: a "preparing your download" page; second hit: the PDF
    Mock::given(method("GET"))
        .and(path("/render/backend/ptpmcrender.fcgi"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html>Preparing your download...</html>"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/render/backend/ptpmcrender.fcgi"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/pdf")
                .set_body_bytes(text_pdf(120)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (acquirer, _) = acquirer_for(&server, dir.path(), Vec::new());
    let paper = record(Some("12345678"), Some("10.1/xyz"), "A Paper", "Fallback abstract.");

    let outcome = acquirer.acquire(&paper).await;

    assert_eq!(outcome.text.source, TextSource::PdfRepository);
}
