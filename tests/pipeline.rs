//! Pipeline integration tests with in-memory backends.
//!
//! No pdfium and no network: a fake [`PageRenderer`] produces blank pages
//! (or fails at chosen DPIs per document) and a scripted [`VisionModel`]
//! replays canned replies in order.

use async_trait::async_trait;
use edgequake_llm::ImageData;
use edgequake_pdf2table::{
    AggregateStore, BatchProgressCallback, BatchStatus, BatchSummary, BoundingBoxRelative,
    ExtractError, ExtractionConfig, Extractor, PageRenderer, PdfSource, RenderError, VisionModel,
};
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Pages are `dpi × 1.3·dpi` px. Documents listed in `failing` fail at the
/// given DPIs.
#[derive(Default)]
struct FakeRenderer {
    pages: usize,
    failing: HashMap<String, Vec<u32>>,
    calls: Mutex<Vec<(String, u32)>>,
}

impl FakeRenderer {
    fn new() -> Self {
        Self {
            pages: 2,
            ..Default::default()
        }
    }

    fn failing_at(mut self, doc: &str, dpis: &[u32]) -> Self {
        self.failing.insert(doc.to_string(), dpis.to_vec());
        self
    }

    fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

impl PageRenderer for FakeRenderer {
    fn page_count(&self, _source: &PdfSource) -> Result<usize, ExtractError> {
        Ok(self.pages)
    }

    fn rasterize(
        &self,
        source: &PdfSource,
        _page_index: usize,
        dpi: u32,
    ) -> Result<DynamicImage, RenderError> {
        let name = source.name();
        self.calls.lock().unwrap().push((name.clone(), dpi));
        if self.failing.get(&name).is_some_and(|d| d.contains(&dpi)) {
            return Err(RenderError::new(dpi, "bitmap allocation failed"));
        }
        let h = dpi * 13 / 10;
        Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            dpi,
            h,
            Rgb([250, 250, 250]),
        )))
    }
}

/// Replays replies in order and records what it was sent.
struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, ExtractError>>>,
    sent: Mutex<Vec<String>>,
    reject_credentials: bool,
    credential_checks: Mutex<usize>,
}

impl ScriptedModel {
    fn new(replies: Vec<Result<&str, ExtractError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| r.map(str::to_string)).collect()),
            sent: Mutex::new(Vec::new()),
            reject_credentials: false,
            credential_checks: Mutex::new(0),
        }
    }

    fn rejecting_credentials(mut self) -> Self {
        self.reject_credentials = true;
        self
    }

    fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    fn credential_checks(&self) -> usize {
        *self.credential_checks.lock().unwrap()
    }
}

fn key_rejected() -> ExtractError {
    ExtractError::ProviderNotConfigured {
        provider: "gemini".into(),
        hint: "Authentication error: 401 API key not valid".into(),
    }
}

#[async_trait]
impl VisionModel for ScriptedModel {
    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn send(&self, image: ImageData, instruction: &str) -> Result<String, ExtractError> {
        assert_eq!(image.mime_type, "image/png");
        self.sent.lock().unwrap().push(instruction.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("{\"tables\":[]}".to_string()))
    }

    async fn check_credentials(&self) -> Result<(), ExtractError> {
        *self.credential_checks.lock().unwrap() += 1;
        if self.reject_credentials {
            Err(key_rejected())
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
struct EventLog(Mutex<Vec<String>>);

impl BatchProgressCallback for EventLog {
    fn on_batch_start(&self, total: usize) {
        self.0.lock().unwrap().push(format!("start {total}"));
    }
    fn on_document_start(&self, index: usize, _total: usize, name: &str) {
        self.0.lock().unwrap().push(format!("doc {index} {name}"));
    }
    fn on_document_complete(&self, index: usize, _total: usize, _name: &str, status: BatchStatus, rows: usize) {
        self.0.lock().unwrap().push(format!("done {index} {status} {rows}"));
    }
    fn on_document_error(&self, index: usize, _total: usize, _name: &str, _error: &str) {
        self.0.lock().unwrap().push(format!("error {index}"));
    }
    fn on_batch_complete(&self, summary: &BatchSummary) {
        self.0.lock().unwrap().push(format!("end {}", summary.total()));
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

const TWO_ROWS: &str = r#"```json
{"tables":[{"name":"Lista de Materiais","columns_detected":["MATERIAL","QTD"],
  "rows":[{"material":"ASTM A36","qtd":4},{"material":"SAE 1020","qtd":2,"obs":"ver nota"}]}]}
```"#;

fn pdf(name: &str) -> PdfSource {
    PdfSource::from_bytes(name, b"%PDF-1.7 fake".to_vec()).unwrap()
}

fn bbox() -> BoundingBoxRelative {
    BoundingBoxRelative::new(0.25, 0.5, 0.75, 1.0).unwrap()
}

fn config(crop_dir: &Path) -> ExtractionConfig {
    ExtractionConfig::builder()
        .crop_dir(crop_dir)
        .api_timeout_secs(Some(5))
        .build()
        .unwrap()
}

fn extractor(
    config: ExtractionConfig,
    model: &Arc<ScriptedModel>,
    renderer: &Arc<FakeRenderer>,
) -> Extractor {
    Extractor::with_components(
        config,
        Arc::clone(model) as Arc<dyn VisionModel>,
        Arc::clone(renderer) as Arc<dyn PageRenderer>,
    )
    .unwrap()
}

// ── Single document ──────────────────────────────────────────────────────────

#[tokio::test]
async fn extracts_rows_and_saves_crop() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![Ok(TWO_ROWS)]));
    let renderer = Arc::new(FakeRenderer::new());
    let ex = extractor(config(dir.path()), &model, &renderer);

    let result = ex.process_document(&pdf("ARG:CE.pdf"), 1, &bbox()).await.unwrap();

    assert!(!result.is_empty);
    assert_eq!(result.rows.len(), 2);
    assert_eq!(result.render_dpi, 400);
    assert_eq!(result.artifacts.table_name, "Lista de Materiais");
    assert_eq!(result.rows[0].table, "lista_de_materiais");
    assert!(result.columns.contains(&"obs".to_string()));
    assert!(result.columns.contains(&"peso_total_kg".to_string()));
    assert_eq!(result.rows[0].fields["obs"], serde_json::Value::Null);
    assert_eq!(result.artifacts.raw_text, TWO_ROWS);

    // 400×520 page, box covers x 100..300, y 260..520
    assert_eq!((result.pixel_region.width(), result.pixel_region.height()), (200, 260));

    let crop_path = result.artifacts.crop_path.expect("crop saved");
    assert_eq!(crop_path, dir.path().join("ARG_CE_p1_crop.jpg"));
    let saved = image::open(&crop_path).unwrap();
    assert_eq!((saved.width(), saved.height()), (200, 260));

    assert_eq!(model.calls(), 1);
    assert!(model.sent.lock().unwrap()[0].contains("\"tables\""));
}

#[tokio::test]
async fn crop_saving_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![Ok(TWO_ROWS)]));
    let renderer = Arc::new(FakeRenderer::new());
    let config = ExtractionConfig::builder()
        .crop_dir(dir.path().join("crops"))
        .save_crops(false)
        .build()
        .unwrap();
    let ex = extractor(config, &model, &renderer);

    let result = ex.process_document(&pdf("a.pdf"), 0, &bbox()).await.unwrap();
    assert!(result.artifacts.crop_path.is_none());
    assert!(!dir.path().join("crops").exists());
}

#[tokio::test]
async fn fallback_render_feeds_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![Ok(TWO_ROWS)]));
    let renderer = Arc::new(FakeRenderer::new().failing_at("a.pdf", &[400]));
    let ex = extractor(config(dir.path()), &model, &renderer);

    let result = ex.process_document(&pdf("a.pdf"), 0, &bbox()).await.unwrap();

    assert_eq!(result.render_dpi, 340);
    assert_eq!(
        renderer.calls(),
        vec![("a.pdf".to_string(), 400), ("a.pdf".to_string(), 340)]
    );
    assert_eq!(result.rows.len(), 2);
}

#[tokio::test]
async fn double_render_failure_is_one_error_and_no_model_call() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![]));
    let renderer = Arc::new(FakeRenderer::new().failing_at("a.pdf", &[400, 340]));
    let ex = extractor(config(dir.path()), &model, &renderer);

    let err = ex.process_document(&pdf("a.pdf"), 0, &bbox()).await.unwrap_err();

    assert!(
        matches!(err, ExtractError::RenderFailed { primary_dpi: 400, fallback_dpi: 340, .. }),
        "got {err:?}"
    );
    assert_eq!(renderer.calls().len(), 2);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn unparseable_reply_is_empty_not_error() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![Ok("I could not find a table, sorry.")]));
    let renderer = Arc::new(FakeRenderer::new());
    let ex = extractor(config(dir.path()), &model, &renderer);

    let result = ex.process_document(&pdf("a.pdf"), 0, &bbox()).await.unwrap();

    assert!(result.is_empty);
    assert!(result.payload.is_none());
    assert!(result.rows.is_empty());
    assert_eq!(result.artifacts.raw_text, "I could not find a table, sorry.");
    assert_eq!(result.artifacts.table_name, "extracted_table");
}

#[tokio::test]
async fn legacy_row_list_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![Ok(r#"[{"material":"aço","qtd":"3"}]"#)]));
    let renderer = Arc::new(FakeRenderer::new());
    let ex = extractor(config(dir.path()), &model, &renderer);

    let result = ex.process_document(&pdf("a.pdf"), 0, &bbox()).await.unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].fields["qtd"], serde_json::json!("3"));
    assert_eq!(result.rows[0].table, "extracted_table");
}

#[tokio::test]
async fn invalid_box_is_rejected_before_any_work() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![]));
    let renderer = Arc::new(FakeRenderer::new());
    let ex = extractor(config(dir.path()), &model, &renderer);

    let inverted = BoundingBoxRelative { x0: 0.8, y0: 0.1, x1: 0.2, y1: 0.9 };
    let err = ex.process_document(&pdf("a.pdf"), 0, &inverted).await.unwrap_err();
    assert!(matches!(err, ExtractError::InvalidBoundingBox(_)));

    let mut store = AggregateStore::new();
    let err = ex
        .run_batch(&[pdf("a.pdf"), pdf("b.pdf")], 0, &inverted, &mut store)
        .await
        .unwrap_err();
    assert!(matches!(err, ExtractError::InvalidBoundingBox(_)));

    assert!(store.is_empty());
    assert!(renderer.calls().is_empty());
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn near_zero_crop_never_reaches_the_model() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![]));
    let renderer = Arc::new(FakeRenderer::new());
    let ex = extractor(config(dir.path()), &model, &renderer);

    // 0.01 of 400 px is 4 px, under the 8 px minimum
    let sliver = BoundingBoxRelative::new(0.5, 0.1, 0.51, 0.9).unwrap();
    let err = ex.process_document(&pdf("a.pdf"), 0, &sliver).await.unwrap_err();
    assert!(matches!(err, ExtractError::CropTooSmall { width: 4, .. }), "got {err:?}");
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn page_out_of_range() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![]));
    let renderer = Arc::new(FakeRenderer::new());
    let ex = extractor(config(dir.path()), &model, &renderer);

    let err = ex.process_document(&pdf("a.pdf"), 5, &bbox()).await.unwrap_err();
    assert!(matches!(err, ExtractError::PageOutOfRange { page: 5, total: 2 }));
}

// ── Batches ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn failing_document_does_not_stop_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![Ok(TWO_ROWS), Ok(r#"{"tables":[{"rows":[]}]}"#)]));
    let renderer = Arc::new(FakeRenderer::new().failing_at("b.pdf", &[400, 340]));
    let events = Arc::new(EventLog::default());
    let config = ExtractionConfig::builder()
        .crop_dir(dir.path())
        .progress_callback(Arc::clone(&events) as Arc<dyn BatchProgressCallback>)
        .build()
        .unwrap();
    let ex = extractor(config, &model, &renderer);

    let mut store = AggregateStore::new();
    let summary = ex
        .run_batch(&[pdf("a.pdf"), pdf("b.pdf"), pdf("c.pdf")], 0, &bbox(), &mut store)
        .await
        .unwrap();

    assert_eq!(summary, BatchSummary { ok: 1, empty: 1, error: 1 });

    let statuses: Vec<(String, BatchStatus, usize)> = store
        .entries()
        .iter()
        .map(|e| (e.document.clone(), e.status, e.row_count))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("a.pdf".to_string(), BatchStatus::Ok, 2),
            ("b.pdf".to_string(), BatchStatus::Error, 0),
            ("c.pdf".to_string(), BatchStatus::Empty, 0),
        ]
    );
    let b_error = store.entries()[1].error.as_deref().unwrap();
    assert!(b_error.contains("340"), "error should name the fallback attempt: {b_error}");

    // only a.pdf contributes rows
    assert_eq!(store.rows().len(), 2);
    assert!(store.rows().iter().all(|r| r.source_document == "a.pdf"));
    assert_eq!(store.rows()[0].table_name, "Lista de Materiais");
    assert_eq!(model.calls(), 2);

    assert_eq!(
        *events.0.lock().unwrap(),
        vec![
            "start 3", "doc 0 a.pdf", "done 0 ok 2", "doc 1 b.pdf", "error 1",
            "doc 2 c.pdf", "done 2 empty 0", "end 3"
        ]
    );
}

#[tokio::test]
async fn invocation_failure_and_timeout_are_ledger_errors() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![
        Err(ExtractError::InvocationFailed { message: "429 quota exceeded".into() }),
        Err(ExtractError::InvocationTimeout { secs: 5 }),
        Ok(TWO_ROWS),
    ]));
    let renderer = Arc::new(FakeRenderer::new());
    let ex = extractor(config(dir.path()), &model, &renderer);

    let mut store = AggregateStore::new();
    let summary = ex
        .run_batch(&[pdf("a.pdf"), pdf("b.pdf"), pdf("c.pdf")], 0, &bbox(), &mut store)
        .await
        .unwrap();

    assert_eq!(summary, BatchSummary { ok: 1, empty: 0, error: 2 });
    let entries = store.entries();
    assert!(entries[0].error.as_deref().unwrap().contains("429 quota exceeded"));
    assert_eq!(entries[1].status, BatchStatus::Error);
    assert_eq!(entries[2].status, BatchStatus::Ok);
}

#[tokio::test]
async fn batch_over_paths_records_unreadable_files() {
    let dir = tempfile::tempdir().unwrap();
    let good = dir.path().join("good.pdf");
    std::fs::write(&good, b"%PDF-1.7 fake").unwrap();
    let not_pdf = dir.path().join("notes.pdf");
    std::fs::write(&not_pdf, b"hello").unwrap();
    let missing = dir.path().join("missing.pdf");

    let model = Arc::new(ScriptedModel::new(vec![Ok(TWO_ROWS)]));
    let renderer = Arc::new(FakeRenderer::new());
    let ex = extractor(config(&dir.path().join("Crop")), &model, &renderer);

    let mut store = AggregateStore::new();
    let summary = ex
        .run_batch_paths(&[missing, good, not_pdf], 0, &bbox(), &mut store)
        .await
        .unwrap();

    assert_eq!(summary, BatchSummary { ok: 1, empty: 0, error: 2 });
    let docs: Vec<&str> = store.entries().iter().map(|e| e.document.as_str()).collect();
    assert_eq!(docs, vec!["missing.pdf", "good.pdf", "notes.pdf"]);
    assert_eq!(store.entries()[1].status, BatchStatus::Ok);
}

#[tokio::test]
async fn batch_rows_export_with_provenance() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![Ok(TWO_ROWS), Ok(TWO_ROWS)]));
    let renderer = Arc::new(FakeRenderer::new());
    let ex = extractor(config(&dir.path().join("Crop")), &model, &renderer);

    let mut store = AggregateStore::new();
    ex.run_batch(&[pdf("a.pdf"), pdf("b.pdf")], 1, &bbox(), &mut store)
        .await
        .unwrap();

    let snap = store.rows_snapshot();
    assert_eq!(snap.records.len(), 4);
    let tail = &snap.headers[snap.headers.len() - 3..];
    assert_eq!(tail, ["_source_pdf", "_page_idx", "_table_name"]);
    assert_eq!(snap.records[3][snap.headers.len() - 3], "b.pdf");
    assert_eq!(snap.records[3][snap.headers.len() - 2], "1");

    let out = store.export_rows(&dir.path().join("out")).unwrap();
    let name = out.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("all_extracted_") && name.ends_with(".csv"), "{name}");
}

// ── Credentials ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn rejected_credential_stops_the_batch_before_any_document() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![Ok(TWO_ROWS)]).rejecting_credentials());
    let renderer = Arc::new(FakeRenderer::new());
    let events = Arc::new(EventLog::default());
    let config = ExtractionConfig::builder()
        .crop_dir(dir.path())
        .progress_callback(Arc::clone(&events) as Arc<dyn BatchProgressCallback>)
        .build()
        .unwrap();
    let ex = extractor(config, &model, &renderer);

    let mut store = AggregateStore::new();
    let err = ex
        .run_batch(&[pdf("a.pdf"), pdf("b.pdf"), pdf("c.pdf")], 0, &bbox(), &mut store)
        .await
        .unwrap_err();

    assert!(err.is_configuration(), "got {err:?}");
    assert_eq!(model.calls(), 0);
    assert!(renderer.calls().is_empty());
    assert!(store.is_empty());
    assert!(events.0.lock().unwrap().is_empty());

    let err = ex.process_document(&pdf("a.pdf"), 0, &bbox()).await.unwrap_err();
    assert!(err.is_configuration());
    assert!(renderer.calls().is_empty());
}

#[tokio::test]
async fn configuration_error_mid_batch_ends_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![Ok(TWO_ROWS), Err(key_rejected()), Ok(TWO_ROWS)]));
    let renderer = Arc::new(FakeRenderer::new());
    let events = Arc::new(EventLog::default());
    let config = ExtractionConfig::builder()
        .crop_dir(dir.path())
        .progress_callback(Arc::clone(&events) as Arc<dyn BatchProgressCallback>)
        .build()
        .unwrap();
    let ex = extractor(config, &model, &renderer);

    let mut store = AggregateStore::new();
    let err = ex
        .run_batch(&[pdf("a.pdf"), pdf("b.pdf"), pdf("c.pdf")], 0, &bbox(), &mut store)
        .await
        .unwrap_err();

    assert!(err.is_configuration(), "got {err:?}");
    assert_eq!(model.calls(), 2, "c.pdf must not reach the model");

    let statuses: Vec<(&str, BatchStatus)> = store
        .entries()
        .iter()
        .map(|e| (e.document.as_str(), e.status))
        .collect();
    assert_eq!(statuses, vec![("a.pdf", BatchStatus::Ok), ("b.pdf", BatchStatus::Error)]);
    assert!(store.entries()[1].error.as_deref().unwrap().contains("401"));
    assert_eq!(store.rows().len(), 2);

    assert_eq!(
        *events.0.lock().unwrap(),
        vec!["start 3", "doc 0 a.pdf", "done 0 ok 2", "doc 1 b.pdf", "error 1"]
    );
}

#[tokio::test]
async fn credentials_are_checked_once_per_extractor() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![]));
    let renderer = Arc::new(FakeRenderer::new());
    let ex = extractor(config(dir.path()), &model, &renderer);

    ex.check_credentials().await.unwrap();
    ex.process_document(&pdf("a.pdf"), 0, &bbox()).await.unwrap();
    let mut store = AggregateStore::new();
    ex.run_batch(&[pdf("b.pdf"), pdf("c.pdf")], 0, &bbox(), &mut store)
        .await
        .unwrap();

    assert_eq!(model.credential_checks(), 1);
    assert_eq!(model.calls(), 3);
}

// ── Preview ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn preview_maps_one_box_onto_both_images() {
    let dir = tempfile::tempdir().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![]));
    let renderer = Arc::new(FakeRenderer::new());
    let config = ExtractionConfig::builder()
        .crop_dir(dir.path())
        .process_dpi(500)
        .fallback_dpi(300)
        .preview_max_width(250)
        .build()
        .unwrap();
    let ex = extractor(config, &model, &renderer);

    let preview = ex.preview(&pdf("a.pdf"), 0, Some(&bbox())).await.unwrap();

    assert_eq!(preview.pair.high_res.width(), 500);
    assert_eq!(preview.pair.preview.width(), 250);
    assert_eq!(preview.pair.preview.dpi, 250);

    let hd = preview.high_res_region.unwrap();
    let pv = preview.preview_region.unwrap();
    assert_eq!((hd.x0, hd.x1), (125, 375));
    assert_eq!((pv.x0, pv.x1), (63, 188));
    assert_eq!(model.calls(), 0);
}
