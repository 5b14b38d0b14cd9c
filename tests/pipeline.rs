//! Integration tests for the extraction pipeline and its HTTP adapter.
//!
//! Both engines are replaced by counting stubs, so these tests need neither
//! tesseract nor a running Ollama.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use receipt2json::server::{NO_FILE_FRAGMENT, NO_FILE_SELECTED_FRAGMENT};
use receipt2json::{
    build_router, fallback_json, parse_expense, ExtractionConfig, Extractor, InferenceBackend,
    InferenceError, NormalizedImage, ReceiptError, ResultSource, SamplingOptions, TextRecognizer,
};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Returns fixed text and counts calls; records the dimensions it saw.
struct CountingRecognizer {
    text: String,
    calls: AtomicUsize,
    seen: Mutex<Vec<(u32, u32)>>,
}

impl CountingRecognizer {
    fn new(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        })
    }
}

impl TextRecognizer for CountingRecognizer {
    fn recognize(&self, image: &NormalizedImage) -> Result<String, ReceiptError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push((image.width(), image.height()));
        Ok(self.text.clone())
    }
}

/// Answers with a fixed response, or fails, and records the prompts it got.
struct StubBackend {
    response: Option<String>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl StubBackend {
    fn answering(response: &str) -> Arc<Self> {
        Arc::new(Self {
            response: Some(response.to_string()),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            response: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl InferenceBackend for StubBackend {
    fn name(&self) -> String {
        "stub".to_string()
    }

    async fn infer(&self, prompt: &str, _sampling: &SamplingOptions) -> Result<String, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        match self.response {
            Some(ref r) => Ok(r.clone()),
            None => Err(InferenceError::Connection {
                url: "http://localhost:11434".into(),
                detail: "connection refused".into(),
            }),
        }
    }
}

fn config_in(upload_dir: &Path) -> ExtractionConfig {
    ExtractionConfig::builder()
        .upload_dir(upload_dir)
        .build()
        .unwrap()
}

fn extractor(
    upload_dir: &Path,
    recognizer: &Arc<CountingRecognizer>,
    backend: &Arc<StubBackend>,
) -> Arc<Extractor> {
    Arc::new(Extractor::new(
        config_in(upload_dir),
        Arc::clone(recognizer) as Arc<dyn TextRecognizer>,
        Arc::clone(backend) as Arc<dyn InferenceBackend>,
    ))
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 255, 255])));
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

const BOUNDARY: &str = "receipt2json-test-boundary";

/// One multipart part: (field name, optional filename, content).
fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match filename {
            Some(f) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{name}\"; filename=\"{f}\"\r\n\
                     Content-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
            ),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ── Library pipeline ─────────────────────────────────────────────────────────

#[tokio::test]
async fn blank_image_with_failing_backend_yields_fallback() {
    let tmp = tempfile::tempdir().unwrap();
    let recognizer = CountingRecognizer::new("");
    let backend = StubBackend::failing();
    let ex = extractor(tmp.path(), &recognizer, &backend);

    let result = ex.extract_upload(&png(200, 300), "blank.png").await.unwrap();

    assert_eq!(result.source, ResultSource::Fallback);
    let record = parse_expense(&result.content).expect("fallback is valid JSON");
    assert_eq!(record.name_of_restaurant, "Error - check Ollama");
    assert_eq!(record.date, "N/A");
    assert_eq!(record.amount, "N/A");
    assert_eq!(record.description, "");
    assert_eq!(record.expense_type, "receipt");
    assert_eq!(record.expense_lines, vec![String::new()]);
    assert!(record.error.unwrap().contains("connection refused"));
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fallback_content_matches_pure_generator() {
    let tmp = tempfile::tempdir().unwrap();
    let text = "SHELL 03/14 $41.20\nFUEL";
    let recognizer = CountingRecognizer::new(text);
    let backend = StubBackend::failing();
    let ex = extractor(tmp.path(), &recognizer, &backend);

    let a = ex.extract_upload(&png(50, 50), "a.png").await.unwrap();
    let b = ex.extract_upload(&png(50, 50), "b.png").await.unwrap();

    let reason = "could not connect to http://localhost:11434: connection refused";
    assert_eq!(a.content, fallback_json(text, reason));
    assert_eq!(a.content, b.content, "fallback is deterministic");
}

#[tokio::test]
async fn model_response_is_annotated_and_prompt_truncated() {
    let tmp = tempfile::tempdir().unwrap();
    let long_text = "A".repeat(1000);
    let recognizer = CountingRecognizer::new(&long_text);
    let backend = StubBackend::answering(r#"{"amount": "4.50"}"#);
    let ex = extractor(tmp.path(), &recognizer, &backend);

    let result = ex.extract_upload(&png(10, 10), "r.jpg").await.unwrap();

    assert_eq!(result.source, ResultSource::Model);
    let re = regex::Regex::new(r"^⚡ Processed in \d+\.\d{2}s\n\n").unwrap();
    assert!(re.is_match(&result.content), "got: {}", result.content);
    assert!(result.content.ends_with(r#"{"amount": "4.50"}"#));

    let prompts = backend.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].starts_with("Extract expense JSON only:"));
    assert!(prompts[0].ends_with(&format!("Text: {}", "A".repeat(400))));
    assert_eq!(result.stats.raw_text_chars, 1000);
}

#[tokio::test]
async fn oversized_image_is_downsampled_before_ocr() {
    let tmp = tempfile::tempdir().unwrap();
    let recognizer = CountingRecognizer::new("x");
    let backend = StubBackend::answering("{}");
    let ex = extractor(tmp.path(), &recognizer, &backend);

    let result = ex.extract_upload(&png(3000, 1500), "big.png").await.unwrap();

    assert_eq!(recognizer.seen.lock().unwrap().as_slice(), &[(2000, 1000)]);
    assert_eq!(
        (result.stats.original_width, result.stats.original_height),
        (3000, 1500)
    );
    assert_eq!(
        (result.stats.normalized_width, result.stats.normalized_height),
        (2000, 1000)
    );
}

#[tokio::test]
async fn empty_upload_is_a_decode_error() {
    let tmp = tempfile::tempdir().unwrap();
    let recognizer = CountingRecognizer::new("x");
    let backend = StubBackend::answering("{}");
    let ex = extractor(tmp.path(), &recognizer, &backend);

    let err = ex.extract_upload(b"", "empty.png").await.unwrap_err();

    assert!(matches!(err, ReceiptError::Decode { .. }), "got: {err:?}");
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn concurrent_uploads_do_not_interfere() {
    let tmp = tempfile::tempdir().unwrap();
    let recognizer = CountingRecognizer::new("TOTAL 9.99");
    let backend = StubBackend::answering("{}");
    let ex = extractor(tmp.path(), &recognizer, &backend);

    let small = png(20, 20);
    let large = png(40, 80);
    let (a, b) = tokio::join!(
        ex.extract_upload(&small, "receipt.png"),
        ex.extract_upload(&large, "receipt.png"),
    );

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!((a.stats.original_width, a.stats.original_height), (20, 20));
    assert_eq!((b.stats.original_width, b.stats.original_height), (40, 80));
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 2);
    assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
}

// ── HTTP adapter ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn upload_renders_model_output_verbatim() {
    let tmp = tempfile::tempdir().unwrap();
    let json = r#"{"name_of_restaurant": "STARBUCKS", "date": "12/05", "amount": "$4.50"}"#;
    let recognizer = CountingRecognizer::new("STARBUCKS 12/05 $4.50");
    let backend = StubBackend::answering(json);
    let app = build_router(extractor(tmp.path(), &recognizer, &backend));

    let body = multipart_body(&[("file", Some("receipt.png"), &png(64, 64))]);
    let resp = app.oneshot(upload_request(body)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let html = body_text(resp).await;
    assert!(html.starts_with(
        r#"<div class="result"><div class="ai-output"><h3>Extracted Information</h3><pre>"#
    ));
    assert!(html.contains(json), "JSON must survive escaping: {html}");
    let re = regex::Regex::new(r"Processed in \d+\.\d{2}s").unwrap();
    assert!(re.is_match(&html));
    assert!(backend.prompts.lock().unwrap()[0].contains("STARBUCKS 12/05 $4.50"));
    assert_eq!(
        std::fs::read_dir(tmp.path()).unwrap().count(),
        0,
        "staged upload removed"
    );
}

#[tokio::test]
async fn missing_file_field_skips_pipeline() {
    let tmp = tempfile::tempdir().unwrap();
    let recognizer = CountingRecognizer::new("x");
    let backend = StubBackend::answering("{}");
    let app = build_router(extractor(tmp.path(), &recognizer, &backend));

    let body = multipart_body(&[("note", None, b"hello")]);
    let resp = app.oneshot(upload_request(body)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, NO_FILE_FRAGMENT);
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn empty_filename_skips_pipeline() {
    let tmp = tempfile::tempdir().unwrap();
    let recognizer = CountingRecognizer::new("x");
    let backend = StubBackend::answering("{}");
    let app = build_router(extractor(tmp.path(), &recognizer, &backend));

    let body = multipart_body(&[("file", Some(""), b"")]);
    let resp = app.oneshot(upload_request(body)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, NO_FILE_SELECTED_FRAGMENT);
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn file_field_without_filename_counts_as_missing() {
    let tmp = tempfile::tempdir().unwrap();
    let recognizer = CountingRecognizer::new("x");
    let backend = StubBackend::answering("{}");
    let app = build_router(extractor(tmp.path(), &recognizer, &backend));

    let body = multipart_body(&[("file", None, b"just text")]);
    let resp = app.oneshot(upload_request(body)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, NO_FILE_FRAGMENT);
    assert_eq!(recognizer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn undecodable_upload_is_422() {
    let tmp = tempfile::tempdir().unwrap();
    let recognizer = CountingRecognizer::new("x");
    let backend = StubBackend::answering("{}");
    let app = build_router(extractor(tmp.path(), &recognizer, &backend));

    let body = multipart_body(&[("file", Some("notes.txt"), b"not an image")]);
    let resp = app.oneshot(upload_request(body)).await.unwrap();

    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body_text(resp).await.contains("❌ Error"));
    assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn index_serves_upload_form() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_router(extractor(
        tmp.path(),
        &CountingRecognizer::new(""),
        &StubBackend::failing(),
    ));

    let req = Request::builder().uri("/").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let html = body_text(resp).await;
    assert!(html.contains(r#"enctype="multipart/form-data""#));
    assert!(html.contains(r#"name="file""#));
}

#[tokio::test]
async fn health_reports_version() {
    let tmp = tempfile::tempdir().unwrap();
    let app = build_router(extractor(
        tmp.path(),
        &CountingRecognizer::new(""),
        &StubBackend::failing(),
    ));

    let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let v: serde_json::Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(v["status"], "ok");
    assert_eq!(v["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(v["backend"], "stub");
}
