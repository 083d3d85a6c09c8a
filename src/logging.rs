//! ログ初期化
//!
//! `RUST_LOG` があればそれを優先し、無ければ `--verbose` に応じて
//! info / debug を既定にする。進捗表示は標準出力、診断ログは標準エラー。

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 既定のフィルタ文字列
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "boq_match_rust=debug,info"
    } else {
        "warn,boq_match_rust=info"
    }
}

/// tracingサブスクライバを登録
///
/// # Arguments
/// * `verbose` - debugレベルまで出す
/// * `json` - JSON形式で出力
pub fn init_logging(verbose: bool, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter(verbose)))?;

    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()?;
    }

    Ok(())
}
