//! 協調的キャンセル
//!
//! バッチ境界でのみ確認する。実行中のプロバイダ呼び出しは中断しない。

use boq_match_common::JobStatus;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 中断の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelKind {
    /// 結果を破棄して終了
    Cancel,
    /// 完了済みバッチを出力して終了
    Stop,
}

impl CancelKind {
    /// 終端状態
    pub fn terminal_status(self) -> JobStatus {
        match self {
            CancelKind::Cancel => JobStatus::Cancelled,
            CancelKind::Stop => JobStatus::Stopped,
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            CancelKind::Cancel => 1,
            CancelKind::Stop => 2,
        }
    }

    fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(CancelKind::Cancel),
            2 => Some(CancelKind::Stop),
            _ => None,
        }
    }
}

/// キャンセル要求のハンドル（clone して共有する）
#[derive(Debug, Clone, Default)]
pub struct CancellationHandle {
    token: CancellationToken,
    kind: Arc<AtomicU8>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.request(CancelKind::Cancel);
    }

    pub fn stop(&self) {
        self.request(CancelKind::Stop);
    }

    /// 最初の要求だけが種類を決める
    pub fn request(&self, kind: CancelKind) {
        let _ = self
            .kind
            .compare_exchange(0, kind.to_u8(), Ordering::SeqCst, Ordering::SeqCst);
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn kind(&self) -> Option<CancelKind> {
        CancelKind::from_u8(self.kind.load(Ordering::SeqCst))
    }

    /// 要求されるまで待つ
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_request_wins() {
        let handle = CancellationHandle::new();
        assert!(!handle.is_cancelled());
        assert_eq!(handle.kind(), None);

        handle.stop();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(handle.kind(), Some(CancelKind::Stop));
    }

    #[test]
    fn test_clones_share_state() {
        let handle = CancellationHandle::new();
        let other = handle.clone();
        other.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(handle.kind().map(CancelKind::terminal_status), Some(JobStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let handle = CancellationHandle::new();
        let waiter = handle.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });
        handle.stop();
        task.await.unwrap();
    }
}
