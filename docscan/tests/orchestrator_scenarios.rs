mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{document_photo, engines, ocr_space_body, test_config, FixedFactory};
use docscan::error::ScanError;
use docscan::ocr::{
    BatchItem, EngineId, EngineMode, OcrOrchestrator, RawImage, RecognizeOptions, Stage,
};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn options_for(orchestrator: &OcrOrchestrator) -> RecognizeOptions {
    orchestrator.default_options()
}

#[tokio::test]
async fn test_clear_invoice_is_read_by_remote() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/parse/image"))
        .and(header("apikey", "integration-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ocr_space_body("INVOICE 12345\r\n")))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let factory = FixedFactory::new("unused", 95.0);
    let (remote, local) = engines(&config, &factory);
    let orchestrator = OcrOrchestrator::with_engines(&config, remote, local);

    let options = options_for(&orchestrator).with_debug(true);
    let outcome = orchestrator
        .recognize(document_photo(2400, 1200), EngineMode::Auto, &options)
        .await
        .unwrap();

    assert!(outcome.text.contains("INVOICE 12345"));
    assert_eq!(outcome.engine_used, EngineId::Remote);
    assert_eq!(factory.created(), 0);

    let diagnostics = outcome.diagnostics.unwrap();
    assert_eq!(diagnostics.original_dimensions, Some((2400, 1200)));
    assert_eq!(diagnostics.normalized_dimensions, (2000, 1000));
    assert!(diagnostics.preprocessing_degraded.is_none());
    assert_eq!(diagnostics.attempts.len(), 1);
}

#[tokio::test]
async fn test_remote_outage_recovers_with_local() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/parse/image"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let config = test_config(&server);
    let factory = FixedFactory::new("TOTAL DUE 42.00", 91.0);
    let (remote, local) = engines(&config, &factory);
    let orchestrator = OcrOrchestrator::with_engines(&config, remote, local);

    let outcome = orchestrator
        .recognize(
            document_photo(800, 600),
            EngineMode::Auto,
            &options_for(&orchestrator),
        )
        .await
        .unwrap();

    assert_eq!(outcome.engine_used, EngineId::Local);
    assert_eq!(outcome.text, "TOTAL DUE 42.00");
    // One initial attempt plus the two configured retries
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    assert_eq!(factory.passes(), 1);
}

#[tokio::test]
async fn test_blank_everywhere_is_no_text_detected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/parse/image"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ocr_space_body("")))
        .mount(&server)
        .await;

    let config = test_config(&server);
    let factory = FixedFactory::new("  ", 0.0);
    let (remote, local) = engines(&config, &factory);
    let orchestrator = OcrOrchestrator::with_engines(&config, remote, local);

    let error = orchestrator
        .recognize(
            document_photo(640, 480),
            EngineMode::Auto,
            &options_for(&orchestrator),
        )
        .await
        .unwrap_err();

    assert!(matches!(error, ScanError::AllEnginesExhausted { .. }));
    assert_eq!(error.to_string(), "No text detected");
    // Primary and fallback segmentation passes inside a single local attempt
    assert_eq!(factory.passes(), 2);
}

#[tokio::test]
async fn test_failed_call_reports_remote_retry_history() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/parse/image"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .mount(&server)
        .await;

    let config = test_config(&server);
    let factory = FixedFactory::new("|", 95.0);
    let (remote, local) = engines(&config, &factory);
    let orchestrator = OcrOrchestrator::with_engines(&config, remote, local);

    let error = orchestrator
        .recognize(
            document_photo(640, 480),
            EngineMode::Auto,
            &options_for(&orchestrator).with_debug(true),
        )
        .await
        .unwrap_err();

    let diagnostics = match error {
        ScanError::AllEnginesExhausted {
            diagnostics: Some(diagnostics),
        } => diagnostics,
        other => panic!("unexpected error: {other:?}"),
    };

    let kinds: Vec<_> = diagnostics.attempts.iter().map(|a| a.error_kind).collect();
    assert_eq!(kinds, vec![Some("engine_rate_limited"), Some("empty_result")]);
    let remote_trace = diagnostics.attempts[0].raw.as_ref().unwrap();
    assert_eq!(remote_trace["attempts"], 3);
    assert_eq!(remote_trace["failures"].as_array().map(Vec::len), Some(3));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
    // Placeholder output triggers the fallback segmentation pass too
    assert_eq!(factory.passes(), 2);
}

#[tokio::test]
async fn test_remote_timeout_falls_back_without_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/parse/image"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(ocr_space_body("too late"))
                .set_delay(Duration::from_millis(600)),
        )
        .mount(&server)
        .await;

    let config = test_config(&server);
    let factory = FixedFactory::new("PAID", 88.0);
    let (_, local) = engines(&config, &factory);
    let remote = docscan::ocr::RemoteEngineClient::new(&config.remote)
        .unwrap()
        .with_timeout(Duration::from_millis(100));
    let orchestrator = OcrOrchestrator::with_engines(&config, Arc::new(remote), local);

    let outcome = orchestrator
        .recognize(
            document_photo(320, 240),
            EngineMode::Auto,
            &options_for(&orchestrator).with_debug(true),
        )
        .await
        .unwrap();

    assert_eq!(outcome.engine_used, EngineId::Local);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);

    let diagnostics = outcome.diagnostics.unwrap();
    assert_eq!(diagnostics.attempts[0].error_kind, Some("engine_timeout"));
    let stages: Vec<Stage> = diagnostics.transitions.iter().map(|t| t.to).collect();
    assert_eq!(
        stages,
        vec![Stage::AttemptPrimary, Stage::AttemptFallback, Stage::Done]
    );
}

#[tokio::test]
async fn test_missing_credential_goes_straight_to_local() {
    let server = MockServer::start().await;

    let mut config = test_config(&server);
    config.remote.api_key = None;
    let factory = FixedFactory::new("RECEIPT", 80.0);
    let (remote, local) = engines(&config, &factory);
    let orchestrator = OcrOrchestrator::with_engines(&config, remote, local);

    let outcome = orchestrator
        .recognize(
            document_photo(300, 200),
            EngineMode::Auto,
            &options_for(&orchestrator),
        )
        .await
        .unwrap();

    assert_eq!(outcome.engine_used, EngineId::Local);
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_remote_mode_surfaces_rejected_credential() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/parse/image"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .expect(1)
        .mount(&server)
        .await;

    let config = test_config(&server);
    let factory = FixedFactory::new("never used", 99.0);
    let (remote, local) = engines(&config, &factory);
    let orchestrator = OcrOrchestrator::with_engines(&config, remote, local);

    let error = orchestrator
        .recognize(
            document_photo(300, 200),
            EngineMode::Remote,
            &options_for(&orchestrator),
        )
        .await
        .unwrap_err();

    assert!(matches!(error, ScanError::EngineUnavailable(_)));
    assert_eq!(factory.created(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_local_calls_share_one_worker() {
    let server = MockServer::start().await;

    let config = test_config(&server);
    let factory = FixedFactory::new("SHARED", 90.0).with_create_delay(Duration::from_millis(100));
    let (remote, local) = engines(&config, &factory);
    let orchestrator = Arc::new(OcrOrchestrator::with_engines(&config, remote, local));
    let options = options_for(&orchestrator);

    let (a, b) = tokio::join!(
        orchestrator.recognize(document_photo(200, 100), EngineMode::Local, &options),
        orchestrator.recognize(document_photo(200, 100), EngineMode::Local, &options),
    );

    assert_eq!(a.unwrap().text, "SHARED");
    assert_eq!(b.unwrap().text, "SHARED");
    assert_eq!(factory.created(), 1);
    assert!(orchestrator.local_worker_loaded());

    orchestrator.release_local_worker().await;
    orchestrator.release_local_worker().await;
    assert!(!orchestrator.local_worker_loaded());

    orchestrator
        .recognize(document_photo(200, 100), EngineMode::Local, &options)
        .await
        .unwrap();
    assert_eq!(factory.created(), 2);
}

#[tokio::test]
async fn test_disabled_pipeline_uses_fixed_engine_only() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/parse/image"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ocr_space_body("remote")))
        .mount(&server)
        .await;

    let mut config = test_config(&server);
    config.pipeline.enabled = false;
    let factory = FixedFactory::new("FIXED LOCAL", 90.0);
    let (remote, local) = engines(&config, &factory);
    let orchestrator = OcrOrchestrator::with_engines(&config, remote, local);

    let outcome = orchestrator
        .recognize(
            document_photo(2400, 1200),
            EngineMode::Remote,
            &options_for(&orchestrator).with_debug(true),
        )
        .await
        .unwrap();

    assert_eq!(outcome.engine_used, EngineId::Local);
    // Re-encoded only, so the bound is not applied
    assert_eq!(
        outcome.diagnostics.unwrap().normalized_dimensions,
        (2400, 1200)
    );
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_batch_keeps_going_after_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/parse/image"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ocr_space_body("PAGE TEXT")))
        .mount(&server)
        .await;

    let config = test_config(&server);
    let factory = FixedFactory::new("", 0.0);
    let (remote, local) = engines(&config, &factory);
    let orchestrator = Arc::new(OcrOrchestrator::with_engines(&config, remote, local));
    let options = options_for(&orchestrator);

    let images = vec![
        ("first.png".to_string(), document_photo(300, 200)),
        ("empty.png".to_string(), RawImage::new(Vec::new())),
        ("third.png".to_string(), document_photo(300, 200)),
    ];

    let items: Vec<BatchItem> = orchestrator
        .recognize_batch(images, EngineMode::Auto, options)
        .collect()
        .await;

    let names: Vec<&str> = items.iter().map(|i| i.name.as_str()).collect();
    assert_eq!(names, vec!["first.png", "empty.png", "third.png"]);
    assert_eq!(items[0].result.as_ref().unwrap().text, "PAGE TEXT");
    assert!(matches!(items[1].result, Err(ScanError::Validation(_))));
    assert_eq!(items[2].result.as_ref().unwrap().text, "PAGE TEXT");
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
