//! 指数バックオフ付き再試行
//!
//! 埋め込みリクエストとジョブ状態の書き込みで共有する。

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// 再試行方針（指数バックオフ）
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// n回目（1始まり）の失敗後の待ち時間
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// 成功するまで合計 `max_retries` 回まで呼び出す
    pub async fn run<T, F, Fut>(&self, label: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_retries {
                        return Err(e);
                    }
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "{} failed, retrying",
                        label
                    );
                    tokio::time::sleep(self.delay_for_attempt(attempt)).await;
                }
            }
        }
    }
}
