use super::{write_output, ExportSink};
use crate::error::Result;
use async_trait::async_trait;
use boq_match_common::{Job, MatchResult};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonReport<'a> {
    job: &'a Job,
    exported_at: String,
    results: &'a [MatchResult],
}

/// ジョブ概要と結果をJSONで書き出す
#[derive(Debug, Clone)]
pub struct JsonExportSink {
    path: PathBuf,
}

impl JsonExportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ExportSink for JsonExportSink {
    async fn export(&self, job: &Job, results: &[MatchResult]) -> Result<()> {
        let report = JsonReport {
            job,
            exported_at: chrono::Utc::now().to_rfc3339(),
            results,
        };
        write_output(&self.path, serde_json::to_vec_pretty(&report)?).await?;
        info!(path = %self.path.display(), rows = results.len(), "results json written");
        Ok(())
    }

    fn destination(&self) -> &Path {
        &self.path
    }
}
