//! ジョブ制御の統合テスト
//!
//! キャンセル・停止・タイムアウト・状態書き込みの再試行を検証

use async_trait::async_trait;
use boq_match_common::{
    CatalogEntry, CatalogIndex, Job, JobStatus, JobUpdate, LineItem, MatchCandidate, MatchOutcome,
    SynonymTable,
};
use boq_match_rust::catalog::MemoryCatalogStore;
use boq_match_rust::embedding::{EmbedMode, Embedder, HashingEmbedder};
use boq_match_rust::error::{BoqError, Result};
use boq_match_rust::export::{ExportSink, JsonExportSink};
use boq_match_rust::job::{
    CancelKind, CancellationHandle, FileJobStore, JobContext, JobController, JobOptions, JobStore,
    MemoryJobStore,
};
use boq_match_rust::matcher::{LexicalMatcher, Matcher, SemanticMatcher};
use boq_match_rust::retry::RetryPolicy;
use rust_xlsxwriter::Workbook;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

const DESCRIPTIONS: [&str; 6] = [
    "Excavate foundation trench",
    "Concrete grade C25 in strip foundations",
    "Supply and install 100mm PVC pipe",
    "Ceramic floor tiles 300 x 300mm",
    "Emulsion paint to plastered walls",
    "Mild steel reinforcement bars",
];

fn workbook(descriptions: &[&str]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    for (col, title) in ["Description", "Unit", "Quantity"].iter().enumerate() {
        sheet.write_string(0, col as u16, *title).unwrap();
    }
    for (idx, description) in descriptions.iter().enumerate() {
        let row = idx as u32 + 1;
        sheet.write_string(row, 0, *description).unwrap();
        sheet.write_string(row, 1, "m").unwrap();
        sheet.write_number(row, 2, (idx + 1) as f64 * 10.0).unwrap();
    }
    workbook.save_to_buffer().expect("Failed to build workbook")
}

fn catalog() -> Arc<MemoryCatalogStore> {
    let entries = DESCRIPTIONS
        .iter()
        .enumerate()
        .map(|(idx, description)| CatalogEntry {
            id: format!("c{}", idx + 1),
            description: description.to_string(),
            rate: 10.0 + idx as f64,
            unit: Some("m".into()),
            ..Default::default()
        })
        .collect();
    Arc::new(MemoryCatalogStore::new(entries))
}

fn lexical() -> Box<dyn Matcher> {
    Box::new(LexicalMatcher::new(SynonymTable::from_preset("construction").unwrap()))
}

fn options(batch_size: usize) -> JobOptions {
    JobOptions {
        batch_size,
        timeout: Duration::from_secs(60),
        min_confidence: 0.4,
    }
}

/// 指定バッチ数を処理した後に中断を要求する
struct InterruptingMatcher {
    inner: LexicalMatcher,
    handle: CancellationHandle,
    kind: CancelKind,
    after_batches: usize,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Matcher for InterruptingMatcher {
    fn name(&self) -> &'static str {
        "interrupting"
    }

    async fn prepare(&mut self, catalog: &CatalogIndex, ctx: &JobContext) -> Result<()> {
        self.inner.prepare(catalog, ctx).await
    }

    async fn score_batch(&self, items: &[LineItem], catalog: &CatalogIndex) -> Vec<Vec<MatchCandidate>> {
        let candidates = self.inner.score_batch(items, catalog).await;
        if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.after_batches {
            self.handle.request(self.kind);
        }
        candidates
    }
}

fn interrupting(handle: &CancellationHandle, kind: CancelKind, after_batches: usize) -> (Box<dyn Matcher>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let matcher = InterruptingMatcher {
        inner: LexicalMatcher::new(SynonymTable::from_preset("construction").unwrap()),
        handle: handle.clone(),
        kind,
        after_batches,
        calls: calls.clone(),
    };
    (Box::new(matcher), calls)
}

/// 文書モードは成功し、クエリモードは最初の `failures` 回だけ失敗する
struct QueryOutageEmbedder {
    inner: HashingEmbedder,
    failures: usize,
    query_calls: AtomicUsize,
}

#[async_trait]
impl Embedder for QueryOutageEmbedder {
    async fn embed(&self, texts: &[String], mode: EmbedMode) -> Result<Vec<Vec<f32>>> {
        if mode == EmbedMode::Query && self.query_calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(BoqError::Provider("503 service unavailable".into()));
        }
        self.inner.embed(texts, mode).await
    }

    fn model_name(&self) -> &str {
        "query-outage"
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn max_batch(&self) -> usize {
        16
    }
}

fn semantic_with_outage(failures: usize) -> Box<dyn Matcher> {
    let embedder = Arc::new(QueryOutageEmbedder {
        inner: HashingEmbedder::default(),
        failures,
        query_calls: AtomicUsize::new(0),
    });
    Box::new(SemanticMatcher::new(
        embedder,
        LexicalMatcher::new(SynonymTable::from_preset("construction").unwrap()),
    ))
}

/// 最初の `failures` 回の更新だけ失敗する
struct FlakyStore {
    inner: MemoryJobStore,
    failures: usize,
    attempts: AtomicUsize,
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn create(&self, job: &Job) -> Result<()> {
        self.inner.create(job).await
    }

    async fn update(&self, id: &str, update: &JobUpdate) -> Result<Job> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(BoqError::JobStore("connection reset".into()));
        }
        self.inner.update(id, update).await
    }

    async fn get(&self, id: &str) -> Result<Job> {
        self.inner.get(id).await
    }

    async fn cancel_request(&self, id: &str) -> Result<Option<CancelKind>> {
        self.inner.cancel_request(id).await
    }

    async fn request_cancel(&self, id: &str, kind: CancelKind) -> Result<()> {
        self.inner.request_cancel(id, kind).await
    }
}

#[tokio::test]
async fn test_completed_job_summary() {
    let store = Arc::new(MemoryJobStore::new());
    let controller = JobController::new(store.clone(), catalog(), options(4));

    let outcome = controller
        .run("job-complete", &workbook(&DESCRIPTIONS), lexical(), None, CancellationHandle::new())
        .await
        .unwrap();

    assert_eq!(outcome.job.status, JobStatus::Completed);
    assert_eq!(outcome.results.len(), 6);
    assert_eq!(outcome.job.total_items, 6);
    assert_eq!(outcome.job.matched_items, 6);
    assert!(outcome.job.confidence_score >= 0.9);

    let stored = store.get("job-complete").await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.progress_percent, 100);
    assert_eq!(stored.matched_items, 6);
}

/// バッチ1の後のキャンセルはバッチ2の前で止まり、永続化された件数はバッチ1分のみ
#[tokio::test]
async fn test_cancel_between_batches() {
    let store = Arc::new(MemoryJobStore::new());
    let controller = JobController::new(store.clone(), catalog(), options(2));
    let handle = CancellationHandle::new();
    let (matcher, calls) = interrupting(&handle, CancelKind::Cancel, 1);

    let outcome = controller
        .run("job-cancel", &workbook(&DESCRIPTIONS), matcher, None, handle)
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.job.status, JobStatus::Cancelled);
    assert!(outcome.results.is_empty());

    let stored = store.get("job-cancel").await.unwrap();
    assert_eq!(stored.status, JobStatus::Cancelled);
    assert_eq!(stored.total_items, 6);
    assert_eq!(stored.matched_items, 2);
}

/// 停止は完了したバッチの結果を出力する
#[tokio::test]
async fn test_stop_exports_completed_batches() {
    let dir = tempdir().expect("Failed to create temp dir");
    let output = dir.path().join("partial.json");
    let json_sink = JsonExportSink::new(&output);
    let sink: &dyn ExportSink = &json_sink;

    let controller = JobController::new(Arc::new(MemoryJobStore::new()), catalog(), options(2));
    let handle = CancellationHandle::new();
    let (matcher, calls) = interrupting(&handle, CancelKind::Stop, 2);

    let outcome = controller
        .run("job-stop", &workbook(&DESCRIPTIONS), matcher, Some(sink), handle)
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.job.status, JobStatus::Stopped);
    assert_eq!(outcome.results.len(), 4);
    assert_eq!(outcome.job.matched_items, 4);

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(written["results"].as_array().unwrap().len(), 4);
    assert_eq!(written["job"]["status"], "stopped");
}

/// 出力されるジョブ記録は終端状態
#[tokio::test]
async fn test_completed_export_carries_final_status() {
    let dir = tempdir().expect("Failed to create temp dir");
    let output = dir.path().join("results.json");
    let json_sink = JsonExportSink::new(&output);
    let sink: &dyn ExportSink = &json_sink;

    let controller = JobController::new(Arc::new(MemoryJobStore::new()), catalog(), options(4));
    let outcome = controller
        .run("job-export", &workbook(&DESCRIPTIONS), lexical(), Some(sink), CancellationHandle::new())
        .await
        .unwrap();
    assert_eq!(outcome.job.status, JobStatus::Completed);

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(written["job"]["status"], "completed");
    assert_eq!(written["job"]["progressPercent"], 100);
    assert_eq!(written["job"]["matchedItems"], 6);
}

/// 全バッチでクエリ埋め込みが失敗したらジョブは失敗
#[tokio::test]
async fn test_provider_failing_every_batch_fails_job() {
    let store = Arc::new(MemoryJobStore::new());
    let controller = JobController::new(store.clone(), catalog(), options(2));

    let outcome = controller
        .run(
            "job-provider-down",
            &workbook(&DESCRIPTIONS[..4]),
            semantic_with_outage(usize::MAX),
            None,
            CancellationHandle::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.job.status, JobStatus::Failed);
    let message = outcome.job.error_message.unwrap();
    assert!(message.contains("every batch (2/2)"), "{}", message);
    assert!(outcome.results.is_empty());
    assert_eq!(store.get("job-provider-down").await.unwrap().status, JobStatus::Failed);
}

/// 一部のバッチだけの失敗は代替候補で完了する
#[tokio::test]
async fn test_provider_failing_some_batches_completes() {
    let controller = JobController::new(Arc::new(MemoryJobStore::new()), catalog(), options(2));

    let outcome = controller
        .run(
            "job-provider-flaky",
            &workbook(&DESCRIPTIONS[..4]),
            semantic_with_outage(1),
            None,
            CancellationHandle::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.job.status, JobStatus::Completed);
    assert_eq!(outcome.results.len(), 4);
    assert_eq!(outcome.results[0].outcome, MatchOutcome::LowConfidenceMatched);
    assert_eq!(outcome.results[2].outcome, MatchOutcome::Matched);
}

/// ジョブストアのキャンセル要求もバッチ境界で検出される
#[tokio::test]
async fn test_store_cancel_marker_is_observed() {
    let dir = tempdir().expect("Failed to create temp dir");
    let store = Arc::new(FileJobStore::new(dir.path()));

    /// 1バッチ目の処理中に外部から停止要求を書き込む
    struct MarkerMatcher {
        inner: LexicalMatcher,
        store: Arc<FileJobStore>,
    }

    #[async_trait]
    impl Matcher for MarkerMatcher {
        fn name(&self) -> &'static str {
            "marker"
        }

        async fn prepare(&mut self, catalog: &CatalogIndex, ctx: &JobContext) -> Result<()> {
            self.inner.prepare(catalog, ctx).await
        }

        async fn score_batch(&self, items: &[LineItem], catalog: &CatalogIndex) -> Vec<Vec<MatchCandidate>> {
            self.store.request_cancel("job-marker", CancelKind::Stop).await.unwrap();
            self.inner.score_batch(items, catalog).await
        }
    }

    let matcher = MarkerMatcher {
        inner: LexicalMatcher::new(SynonymTable::from_preset("construction").unwrap()),
        store: store.clone(),
    };
    let controller = JobController::new(store.clone(), catalog(), options(3));
    let outcome = controller
        .run("job-marker", &workbook(&DESCRIPTIONS), Box::new(matcher), None, CancellationHandle::new())
        .await
        .unwrap();

    assert_eq!(outcome.job.status, JobStatus::Stopped);
    assert_eq!(outcome.results.len(), 3);
    assert_eq!(store.get("job-marker").await.unwrap().status, JobStatus::Stopped);
}

#[tokio::test]
async fn test_timeout_marks_job_failed() {
    let store = Arc::new(MemoryJobStore::new());
    let controller = JobController::new(
        store.clone(),
        catalog(),
        JobOptions {
            timeout: Duration::ZERO,
            ..options(2)
        },
    );

    let outcome = controller
        .run("job-timeout", &workbook(&DESCRIPTIONS), lexical(), None, CancellationHandle::new())
        .await
        .unwrap();

    assert_eq!(outcome.job.status, JobStatus::Failed);
    let message = outcome.job.error_message.unwrap();
    assert!(message.starts_with("timed out after"), "{}", message);
    assert!(message.contains("during catalog"));
    assert_eq!(store.get("job-timeout").await.unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn test_document_without_items_fails() {
    let store = Arc::new(MemoryJobStore::new());
    let controller = JobController::new(store.clone(), catalog(), options(2));

    let outcome = controller
        .run("job-empty", &workbook(&[]), lexical(), None, CancellationHandle::new())
        .await
        .unwrap();
    assert_eq!(outcome.job.status, JobStatus::Failed);
    assert!(outcome.job.error_message.is_some());

    let outcome = controller
        .run("job-garbage", b"not a spreadsheet", lexical(), None, CancellationHandle::new())
        .await
        .unwrap();
    assert_eq!(outcome.job.status, JobStatus::Failed);
    assert!(outcome.report.is_none());
}

/// カタログが空でもジョブは完了し、全明細が NoCatalogAvailable
#[tokio::test]
async fn test_empty_catalog_completes() {
    let controller = JobController::new(
        Arc::new(MemoryJobStore::new()),
        Arc::new(MemoryCatalogStore::new(vec![])),
        options(4),
    );
    let outcome = controller
        .run("job-no-catalog", &workbook(&DESCRIPTIONS[..3]), lexical(), None, CancellationHandle::new())
        .await
        .unwrap();

    assert_eq!(outcome.job.status, JobStatus::Completed);
    assert_eq!(outcome.job.matched_items, 0);
    assert_eq!(outcome.job.confidence_score, 0.0);
    assert!(outcome
        .results
        .iter()
        .all(|r| r.outcome == MatchOutcome::NoCatalogAvailable));
}

/// 状態書き込みの一時的な失敗は再試行で吸収される
#[tokio::test]
async fn test_status_writes_are_retried() {
    let store = Arc::new(FlakyStore {
        inner: MemoryJobStore::new(),
        failures: 2,
        attempts: AtomicUsize::new(0),
    });
    let controller = JobController::new(store.clone(), catalog(), options(6)).with_retry(RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1),
    });

    let outcome = controller
        .run("job-flaky", &workbook(&DESCRIPTIONS), lexical(), None, CancellationHandle::new())
        .await
        .unwrap();

    assert_eq!(outcome.job.status, JobStatus::Completed);
    let stored = store.get("job-flaky").await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.matched_items, 6);
}
