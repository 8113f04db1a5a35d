//! End-to-end integration tests: batch orchestration over real components
//! against a mock server, through to the CSV report.

use std::sync::Arc;

use pubminer_core::acquire::{AcquirerEndpoints, FullTextAcquirer};
use pubminer_core::analyze::{FieldSchema, FieldSpec, LlmExtractor};
use pubminer_core::config::{AcquireConfig, LlmConfig, MirrorPoolConfig, PipelineConfig};
use pubminer_core::download::{HttpClient, RetryPolicy, ServiceRateLimiter};
use pubminer_core::mirror::MirrorHealthTracker;
use pubminer_core::pipeline::{BatchOrchestrator, ExtractionStatus, restore_input_order};
use pubminer_core::report::write_csv_report;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod support;
use support::{bioc_body, record};

fn schema() -> Arc<FieldSchema> {
    Arc::new(FieldSchema {
        name: "test".to_string(),
        fields: vec![
            FieldSpec {
                key: "study_type".to_string(),
                name: "Study Type".to_string(),
                description: "The study design".to_string(),
                required: true,
            },
            FieldSpec {
                key: "key_findings".to_string(),
                name: "Key Findings".to_string(),
                description: "Main results".to_string(),
                required: false,
            },
        ],
    })
}

fn orchestrator_for(
    server: &MockServer,
    download_dir: &std::path::Path,
    schema: Arc<FieldSchema>,
) -> BatchOrchestrator {
    let limiter = Arc::new(ServiceRateLimiter::unlimited());
    let retry = RetryPolicy::with_max_attempts(2);
    let client = HttpClient::new(
        std::time::Duration::from_secs(10),
        vec!["pubminer-tests/0.1".to_string()],
    );
    let acquire_config = AcquireConfig {
        download_dir: download_dir.to_path_buf(),
        ..AcquireConfig::default()
    };
    let mirror_config = MirrorPoolConfig {
        mirrors: Vec::new(),
        attempt_delay_ms: 0,
    };

    let acquirer = Arc::new(FullTextAcquirer::new(
        client,
        Arc::clone(&limiter),
        retry.clone(),
        Arc::new(MirrorHealthTracker::new(&mirror_config.mirrors)),
        &acquire_config,
        &mirror_config,
        AcquirerEndpoints::all_at(&server.uri()),
        None,
        None,
    ));

    let llm_config = LlmConfig {
        provider: "test-llm".to_string(),
        api_base: format!("{}/llm", server.uri()),
        model: "test-model".to_string(),
        api_key: "test-key".to_string(),
        temperature: 0.0,
        max_tokens: 512,
        timeout_secs: 10,
    };
    let extractor = Arc::new(LlmExtractor::new(llm_config, limiter, retry));

    let pipeline_config = PipelineConfig {
        concurrency: 4,
        batch_size: 10,
        batch_pause_secs: 0,
    };
    BatchOrchestrator::new(acquirer, extractor, schema, "English", None, &pipeline_config)
        .expect("valid pipeline config")
}

/// Mounts BioC full text for a pmid.
async fn mount_bioc(server: &MockServer, pmid: &str, marker: &str) {
    Mock::given(method("GET"))
        .and(path(format!("/bioc/BioC_json/{pmid}/unicode")))
        .respond_with(ResponseTemplate::new(200).set_body_json(bioc_body(&[
            ("TITLE", &format!("Paper {marker}")),
            (
                "ABSTRACT",
                &format!("Abstract for {marker} with plenty of body text."),
            ),
        ])))
        .mount(server)
        .await;
}

fn chat_response(content: &str) -> serde_json::Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": content}}]
    })
}

#[tokio::test]
async fn test_batch_run_end_to_end_with_mixed_outcomes() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_bioc(&server, "1001", "one").await;
    mount_bioc(&server, "1002", "two").await;
    mount_bioc(&server, "1003", "three").await;
    // 1004 has no full text and no abstract: ends as no_content
    Mock::given(method("GET"))
        .and(path("/bioc/BioC_json/1004/unicode"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    // The LLM answers paper "two" with unparseable prose, everything else
    // with a valid extraction object (fenced, as models like to do)
    Mock::given(method("POST"))
        .and(path("/llm/chat/completions"))
        .and(body_string_contains("Paper two"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(
            "Sorry, I cannot produce JSON today.",
        )))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/llm/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(
            "```json\n{\"study_type\": \"RCT\", \"key_findings\": \"It works.\"}\n```",
        )))
        .mount(&server)
        .await;

    let schema = schema();
    let orchestrator = orchestrator_for(&server, dir.path(), Arc::clone(&schema));

    let records = vec![
        record(Some("1001"), None, "Paper one", ""),
        record(Some("1002"), None, "Paper two", ""),
        record(Some("1003"), None, "Paper three", ""),
        record(Some("1004"), None, "Paper four", ""),
    ];

    let (mut results, stats) = orchestrator.run(records).await;
    restore_input_order(&mut results);

    assert_eq!(results.len(), 4);
    assert_eq!(results[0].status, ExtractionStatus::Success);
    assert_eq!(results[0].fields["study_type"], "RCT");
    assert_eq!(results[1].status, ExtractionStatus::JsonError);
    assert_eq!(results[2].status, ExtractionStatus::Success);
    assert_eq!(results[3].status, ExtractionStatus::NoContent);

    assert_eq!(stats.total, 4);
    assert_eq!(stats.success, 2);
    assert_eq!(stats.json_error, 1);
    assert_eq!(stats.no_content, 1);

    // Report carries one row per record with the fixed column contract
    let report_path = dir.path().join("report.csv");
    write_csv_report(&report_path, &results, &schema).unwrap();
    let contents = std::fs::read_to_string(&report_path).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 5);
    assert!(lines[0].starts_with("pmid,doi,title,journal,year,authors,text_source"));
    assert!(lines[0].ends_with("study_type,key_findings,error"));
    assert!(lines[1].contains("structured_api"));
    assert!(lines[2].contains("json_error"));
    assert!(lines[4].contains("no_content"));
}

#[tokio::test]
async fn test_llm_outage_tags_api_error_without_aborting_batch() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_bioc(&server, "2001", "alpha").await;
    mount_bioc(&server, "2002", "beta").await;

    // Provider is down hard; retries exhaust and the record is tagged
    Mock::given(method("POST"))
        .and(path("/llm/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let orchestrator = orchestrator_for(&server, dir.path(), schema());
    let records = vec![
        record(Some("2001"), None, "Paper alpha", ""),
        record(Some("2002"), None, "Paper beta", ""),
    ];

    let (results, stats) = orchestrator.run(records).await;

    assert_eq!(results.len(), 2);
    assert!(results
        .iter()
        .all(|r| r.status == ExtractionStatus::ApiError));
    assert_eq!(stats.api_error, 2);
    // Provenance is preserved even when extraction fails
    assert!(results
        .iter()
        .all(|r| r.text_source == pubminer_core::acquire::TextSource::StructuredApi));
}

#[tokio::test]
async fn test_rate_limited_llm_succeeds_after_retry() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_bioc(&server, "3001", "gamma").await;

    // First call is throttled with Retry-After, second succeeds
    Mock::given(method("POST"))
        .and(path("/llm/chat/completions"))
        .respond_with(
            ResponseTemplate::new(429).insert_header("retry-after", "1"),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/llm/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_response(
            "{\"study_type\": \"cohort\", \"key_findings\": \"Stable.\"}",
        )))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = orchestrator_for(&server, dir.path(), schema());
    let (results, stats) = orchestrator
        .run(vec![record(Some("3001"), None, "Paper gamma", "")])
        .await;

    assert_eq!(stats.success, 1);
    assert_eq!(results[0].fields["study_type"], "cohort");
}
