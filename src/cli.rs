use crate::strategy::{ProviderKind, Strategy};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "boq-match")]
#[command(about = "BOQ明細の取り込み・単価カタログ照合ツール", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// ログをJSON形式で出力
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// BOQを取り込んでカタログと照合する
    Run {
        /// BOQスプレッドシート (xlsx/xls/ods)
        #[arg(required = true)]
        file: PathBuf,

        /// 単価カタログJSON
        #[arg(short, long)]
        catalog: PathBuf,

        /// 照合方式（省略時は設定値）
        #[arg(short, long)]
        strategy: Option<Strategy>,

        /// 埋め込みプロバイダ（先頭がprimary、最大2件）
        #[arg(short, long, value_delimiter = ',')]
        provider: Vec<ProviderKind>,

        /// 出力ファイル（.xlsx / .json）
        #[arg(short, long, default_value = "results.xlsx")]
        output: PathBuf,

        /// ジョブID（省略時は自動生成）
        #[arg(long)]
        job_id: Option<String>,

        /// 1バッチあたりの明細数
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// 制限時間（秒）
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// 取り込みのみ実行して構造を表示
    Inspect {
        /// BOQスプレッドシート
        #[arg(required = true)]
        file: PathBuf,

        /// 明細をJSONで出力
        #[arg(long)]
        json: bool,
    },

    /// ジョブの状態を表示
    Status {
        #[arg(required = true)]
        job_id: String,
    },

    /// 実行中のジョブを中断
    Cancel {
        #[arg(required = true)]
        job_id: String,

        /// 完了したバッチの結果を残して停止
        #[arg(long)]
        stop: bool,
    },

    /// 設定を表示/編集
    Config {
        /// APIキーを設定 (PROVIDER=KEY)
        #[arg(long)]
        set_api_key: Option<String>,

        /// 設定を表示
        #[arg(long)]
        show: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "boq-match",
            "run",
            "boq.xlsx",
            "--catalog",
            "catalog.json",
            "--strategy",
            "hybrid",
            "--provider",
            "cohere,openai",
            "-v",
        ]);
        assert!(cli.verbose);
        match cli.command {
            Commands::Run {
                strategy,
                provider,
                output,
                ..
            } => {
                assert_eq!(strategy, Some(Strategy::Hybrid));
                assert_eq!(provider, vec![ProviderKind::Cohere, ProviderKind::Openai]);
                assert_eq!(output, PathBuf::from("results.xlsx"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_cancel_stop() {
        let cli = Cli::parse_from(["boq-match", "cancel", "job-1", "--stop"]);
        assert!(matches!(cli.command, Commands::Cancel { stop: true, .. }));
    }
}
