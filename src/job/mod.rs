//! ジョブ制御
//!
//! 1ジョブ = 取り込み → カタログ準備 → バッチ照合 → 出力 の逐次ループ。
//! キャンセル・停止・タイムアウトはバッチ境界でのみ確認する。
//! 実行中の埋め込みリクエストは中断しない。

pub mod cancel;
pub mod context;
pub mod store;

pub use cancel::{CancelKind, CancellationHandle};
pub use context::JobContext;
pub use store::{FileJobStore, JobStore, MemoryJobStore};

use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::error::{BoqError, Result};
use crate::export::ExportSink;
use crate::ingest::{IngestReport, IngestionEngine};
use crate::matcher::{to_results, Matcher};
use crate::retry::RetryPolicy;
use boq_match_common::{CatalogIndex, Job, JobStatus, LineItem, MatchResult};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const PROGRESS_PARSING: u8 = 5;
const PROGRESS_PARSED: u8 = 20;
const PROGRESS_MATCHING_START: u8 = 30;
const PROGRESS_MATCHING_END: u8 = 95;

/// ジョブ実行パラメータ
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// 1バッチあたりの明細数
    pub batch_size: usize,
    pub timeout: Duration,
    pub min_confidence: f64,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl JobOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            timeout: Duration::from_secs(config.timeout_seconds),
            min_confidence: config.min_confidence,
        }
    }
}

/// ジョブの最終結果
#[derive(Debug, Clone)]
pub struct JobOutcome {
    /// 終端状態のジョブ
    pub job: Job,
    /// 照合結果（cancelled では空、stopped では完了したバッチ分）
    pub results: Vec<MatchResult>,
    /// 取り込みに成功した場合のレポート
    pub report: Option<IngestReport>,
}

/// 照合バッチループの中断理由
enum Interruption {
    Cancelled,
    Failed(BoqError),
}

impl From<BoqError> for Interruption {
    fn from(err: BoqError) -> Self {
        match err {
            BoqError::Cancelled => Interruption::Cancelled,
            other => Interruption::Failed(other),
        }
    }
}

pub struct JobController {
    store: Arc<dyn JobStore>,
    catalog: Arc<dyn CatalogStore>,
    ingestion: IngestionEngine,
    options: JobOptions,
    retry: RetryPolicy,
}

impl JobController {
    pub fn new(store: Arc<dyn JobStore>, catalog: Arc<dyn CatalogStore>, options: JobOptions) -> Self {
        Self {
            store,
            catalog,
            ingestion: IngestionEngine::default(),
            options,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_ingestion(mut self, ingestion: IngestionEngine) -> Self {
        self.ingestion = ingestion;
        self
    }

    /// 状態書き込みの再試行方針
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// ファイルを読み込んでジョブを実行
    pub async fn run_file(
        &self,
        job_id: &str,
        path: &Path,
        matcher: Box<dyn Matcher>,
        sink: Option<&dyn ExportSink>,
        cancel: CancellationHandle,
    ) -> Result<JobOutcome> {
        if !tokio::fs::try_exists(path).await? {
            return Err(BoqError::FileNotFound(path.display().to_string()));
        }
        let document = tokio::fs::read(path).await?;
        self.run(job_id, &document, matcher, sink, cancel).await
    }

    /// ジョブを最後まで実行する
    ///
    /// ジョブ内の失敗は `Failed` 状態の `JobOutcome` として返す。
    /// `Err` になるのはジョブ記録を作れなかった場合のみ。
    pub async fn run(
        &self,
        job_id: &str,
        document: &[u8],
        mut matcher: Box<dyn Matcher>,
        sink: Option<&dyn ExportSink>,
        cancel: CancellationHandle,
    ) -> Result<JobOutcome> {
        let job = Job::new(job_id);
        self.store.create(&job).await?;
        let ctx = JobContext::new(job, self.store.clone(), cancel, self.options.timeout)
            .with_retry(self.retry);
        info!(job = job_id, matcher = matcher.name(), "job started");

        ctx.report(PROGRESS_PARSING, "parsing document").await;
        let report = match self.ingest(document) {
            Ok(report) => report,
            Err(e) => return Ok(self.fail(&ctx, e, None).await),
        };
        let total = report.items.len();
        ctx.update(|job| {
            job.total_items = total;
            job.progress_percent = PROGRESS_PARSED;
            job.phase_message = format!("parsed {} items from {} sheets", total, report.sheets.len());
        })
        .await;

        let catalog = match self.prepare(&ctx, matcher.as_mut()).await {
            Ok(catalog) => catalog,
            Err(BoqError::Cancelled) => return Ok(self.interrupt(&ctx, Vec::new(), sink, Some(report)).await),
            Err(e) => return Ok(self.fail(&ctx, e, Some(report)).await),
        };

        let mut results = Vec::with_capacity(total);
        match self.match_batches(&ctx, matcher.as_ref(), &report.items, &catalog, &mut results).await {
            Ok(()) => {}
            Err(Interruption::Cancelled) => return Ok(self.interrupt(&ctx, results, sink, Some(report)).await),
            Err(Interruption::Failed(e)) => return Ok(self.fail(&ctx, e, Some(report)).await),
        }

        if let Some(sink) = sink {
            ctx.report(PROGRESS_MATCHING_END, "exporting results").await;
            let snapshot = terminal_snapshot(ctx.snapshot().await, JobStatus::Completed);
            if let Err(e) = sink.export(&snapshot, &results).await {
                return Ok(self.fail(&ctx, e, Some(report)).await);
            }
        }

        ctx.update(|job| {
            job.status = JobStatus::Completed;
            job.progress_percent = 100;
            job.phase_message = format!("completed: {}/{} items matched", job.matched_items, total);
        })
        .await;
        let job = ctx.snapshot().await;
        info!(
            job = job_id,
            matched = job.matched_items,
            total,
            confidence = job.confidence_score,
            elapsed_ms = job.elapsed_ms,
            "job completed"
        );

        Ok(JobOutcome {
            job,
            results,
            report: Some(report),
        })
    }

    /// 取り込み（明細0件は照合可能な構造なしとして失敗）
    fn ingest(&self, document: &[u8]) -> Result<IngestReport> {
        let report = self.ingestion.parse(document)?;
        if report.items.is_empty() {
            return Err(BoqError::NoMatchableStructure(format!(
                "{} sheets scanned, none yielded line items",
                report.sheets.len()
            )));
        }
        Ok(report)
    }

    /// カタログ読み込みと照合器の前処理
    async fn prepare(&self, ctx: &JobContext, matcher: &mut dyn Matcher) -> Result<CatalogIndex> {
        ctx.checkpoint("catalog").await?;
        let catalog = self.catalog.load_index().await?;
        if catalog.is_empty() {
            warn!(job = %ctx.job_id(), "catalog is empty, items will have no candidates");
        }
        matcher.prepare(&catalog, ctx).await?;
        ctx.report(PROGRESS_MATCHING_START, format!("catalog ready ({} entries)", catalog.len()))
            .await;
        Ok(catalog)
    }

    /// バッチ単位の照合ループ
    async fn match_batches(
        &self,
        ctx: &JobContext,
        matcher: &dyn Matcher,
        items: &[LineItem],
        catalog: &CatalogIndex,
        results: &mut Vec<MatchResult>,
    ) -> std::result::Result<(), Interruption> {
        let total = items.len();
        let mut batches = 0;
        let mut degraded = 0;
        for batch in items.chunks(self.options.batch_size) {
            ctx.checkpoint("matching").await?;

            let failed_before = matcher.failed_batches();
            let candidates = matcher.score_batch(batch, catalog).await;
            batches += 1;
            if matcher.failed_batches() > failed_before {
                degraded += 1;
            }
            results.extend(to_results(batch, candidates, catalog, self.options.min_confidence));

            let done = results.len();
            let (matched, confidence) = summarize(results);
            let span = (PROGRESS_MATCHING_END - PROGRESS_MATCHING_START) as usize;
            let percent = PROGRESS_MATCHING_START + (span * done / total.max(1)) as u8;
            ctx.update(|job| {
                job.progress_percent = percent;
                job.matched_items = matched;
                job.confidence_score = confidence;
                job.phase_message = format!("matching {}/{} items ({} matches)", done, total, matched);
            })
            .await;
        }

        // 一部のバッチの失敗は代替候補で続行、全バッチ失敗ならジョブ失敗
        if batches > 0 && degraded == batches {
            return Err(Interruption::Failed(BoqError::Provider(format!(
                "embedding provider failed for every batch ({}/{})",
                degraded, batches
            ))));
        }
        if degraded > 0 {
            warn!(job = %ctx.job_id(), degraded, batches, "some batches used fallback candidates");
        }
        Ok(())
    }

    /// キャンセル・停止の終了処理
    async fn interrupt(
        &self,
        ctx: &JobContext,
        results: Vec<MatchResult>,
        sink: Option<&dyn ExportSink>,
        report: Option<IngestReport>,
    ) -> JobOutcome {
        let kind = ctx.cancel_kind().unwrap_or(CancelKind::Cancel);
        let done = results.len();
        let results = match kind {
            CancelKind::Cancel => Vec::new(),
            CancelKind::Stop => results,
        };

        if let (CancelKind::Stop, Some(sink)) = (kind, sink) {
            let snapshot = terminal_snapshot(ctx.snapshot().await, kind.terminal_status());
            if let Err(e) = sink.export(&snapshot, &results).await {
                error!(job = %ctx.job_id(), error = %e, "failed to export partial results");
            }
        }

        ctx.update(|job| {
            job.status = kind.terminal_status();
            job.phase_message = match kind {
                CancelKind::Cancel => format!("cancelled after {} items", done),
                CancelKind::Stop => format!("stopped after {} items", done),
            };
        })
        .await;
        let job = ctx.snapshot().await;
        info!(job = %ctx.job_id(), status = %job.status, processed = done, "job interrupted");
        JobOutcome { job, results, report }
    }

    /// 失敗として終了
    async fn fail(&self, ctx: &JobContext, err: BoqError, report: Option<IngestReport>) -> JobOutcome {
        let message = err.to_string();
        error!(job = %ctx.job_id(), error = %message, "job failed");
        ctx.update(|job| {
            job.status = JobStatus::Failed;
            job.phase_message = "failed".into();
            job.error_message = Some(message);
        })
        .await;
        JobOutcome {
            job: ctx.snapshot().await,
            results: Vec::new(),
            report,
        }
    }
}

/// 出力用に終端状態を反映した記録（ストアへの確定は出力後）
fn terminal_snapshot(mut job: Job, status: JobStatus) -> Job {
    if status == JobStatus::Completed {
        job.progress_percent = 100;
    }
    job.status = status;
    job
}

/// Matched 件数と平均信頼度
pub fn summarize(results: &[MatchResult]) -> (usize, f64) {
    let matched: Vec<f64> = results
        .iter()
        .filter(|r| r.is_matched())
        .map(|r| r.confidence())
        .collect();
    if matched.is_empty() {
        return (0, 0.0);
    }
    let mean = matched.iter().sum::<f64>() / matched.len() as f64;
    (matched.len(), mean)
}
