//! 結果Excelの書き出し

use super::{write_output, ExportSink};
use crate::error::{BoqError, Result};
use async_trait::async_trait;
use boq_match_common::export::excel_core::generate_results_buffer;
use boq_match_common::{Job, MatchResult};
use std::path::{Path, PathBuf};
use tracing::info;

/// 照合結果シートと集計シートを持つxlsxを書き出す
#[derive(Debug, Clone)]
pub struct XlsxExportSink {
    path: PathBuf,
}

impl XlsxExportSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ExportSink for XlsxExportSink {
    async fn export(&self, job: &Job, results: &[MatchResult]) -> Result<()> {
        let buffer = generate_results_buffer(job, results).map_err(BoqError::ExcelGeneration)?;
        write_output(&self.path, buffer).await?;
        info!(path = %self.path.display(), rows = results.len(), "results workbook written");
        Ok(())
    }

    fn destination(&self) -> &Path {
        &self.path
    }
}
