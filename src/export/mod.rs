//! 照合結果の出力先

pub mod excel;
pub mod json;

pub use excel::XlsxExportSink;
pub use json::JsonExportSink;

use crate::error::Result;
use async_trait::async_trait;
use boq_match_common::{Job, MatchResult};
use std::path::Path;

#[async_trait]
pub trait ExportSink: Send + Sync {
    /// 結果を書き出す（明細の行順）
    async fn export(&self, job: &Job, results: &[MatchResult]) -> Result<()>;

    /// 出力先の表示用パス
    fn destination(&self) -> &Path;
}

/// 拡張子から出力先を選ぶ（.json 以外は xlsx）
pub fn sink_for_path(path: &Path) -> Box<dyn ExportSink> {
    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        Box::new(JsonExportSink::new(path))
    } else {
        Box::new(XlsxExportSink::new(path))
    }
}

/// 親ディレクトリを作ってから書き込む
pub(crate) async fn write_output(path: &Path, bytes: Vec<u8>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}
