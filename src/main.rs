use anyhow::{bail, Context};
use boq_match_rust::{catalog, cli, config, export, ingest, job, logging, matcher};
use catalog::JsonCatalogStore;
use clap::Parser;
use cli::{Cli, Commands};
use config::Config;
use indicatif::{ProgressBar, ProgressStyle};
use job::{CancelKind, CancellationHandle, FileJobStore, JobController, JobOptions, JobStore};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose, cli.log_json)?;
    let config = Config::load()?;

    match cli.command {
        Commands::Run { file, catalog, strategy, provider, output, job_id, batch_size, timeout } => {
            println!("📊 boq-match - 単価照合\n");

            let mut config = config;
            if let Some(strategy) = strategy {
                config.strategy = strategy;
            }
            if !provider.is_empty() {
                config.providers = provider;
            }
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            if let Some(timeout) = timeout {
                config.timeout_seconds = timeout;
            }
            config.validate()?;

            let job_id = job_id.unwrap_or_else(new_job_id);
            let store: Arc<dyn JobStore> = Arc::new(FileJobStore::new(config.jobs_dir()?));
            let controller = JobController::new(
                store.clone(),
                Arc::new(JsonCatalogStore::new(&catalog)),
                JobOptions::from_config(&config),
            );
            let matcher = matcher::build_matcher(&config)?;
            let sink = export::sink_for_path(&output);

            // 1. 開始
            println!("[1/4] ジョブ開始: {} (方式: {})", job_id, config.strategy);
            let cancel = CancellationHandle::new();
            {
                let handle = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        eprintln!("\n停止を要求しました（現在のバッチ完了後に停止します）");
                        handle.stop();
                    }
                });
            }

            let progress = create_progress_bar();
            let watcher = tokio::spawn(watch_progress(store.clone(), job_id.clone(), progress.clone()));
            let outcome = controller
                .run_file(&job_id, &file, matcher, Some(sink.as_ref()), cancel)
                .await;
            watcher.abort();
            progress.finish_and_clear();
            let outcome = outcome?;

            // 2. 取り込み
            if let Some(report) = &outcome.report {
                println!(
                    "[2/4] 取り込み: {}件 ({}シート, 品質 {:.2})",
                    report.items.len(),
                    report.sheets.len(),
                    report.quality.score
                );
            }

            // 3. 照合
            let job = &outcome.job;
            println!(
                "[3/4] 照合: {}/{}件 (平均信頼度 {:.2})",
                job.matched_items, job.total_items, job.confidence_score
            );

            // 4. 出力
            match job.status {
                boq_match_common::JobStatus::Completed | boq_match_common::JobStatus::Stopped => {
                    println!("[4/4] 出力: {}", sink.destination().display());
                    println!("\n✅ {} ({:.1}秒)", job.status, job.elapsed_ms as f64 / 1000.0);
                }
                boq_match_common::JobStatus::Cancelled => {
                    println!("\n⚠ キャンセルされました（結果は出力していません）");
                }
                _ => bail!(
                    "ジョブ失敗: {}",
                    job.error_message.as_deref().unwrap_or("unknown error")
                ),
            }
        }

        Commands::Inspect { file, json } => {
            let report = ingest::IngestionEngine::default()
                .parse_file(&file)
                .with_context(|| format!("{} を読み込めません", file.display()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report.items)?);
                return Ok(());
            }

            println!("📄 {}\n", file.display());
            for sheet in &report.sheets {
                let header = sheet
                    .header_row
                    .map(|row| format!("{}行目", row))
                    .unwrap_or_else(|| "-".into());
                println!(
                    "  {}: 構造={} 見出し={} 明細={} 見出し行={} 除外={} 統合={}",
                    sheet.name,
                    sheet.source,
                    header,
                    sheet.items,
                    sheet.headers,
                    sheet.skipped,
                    sheet.merged_duplicates
                );
            }
            let quality = &report.quality;
            println!("\n明細: {}件", report.items.len());
            println!(
                "品質: {:.2} (抽出率 {:.2}, 平均説明長 {:.1}, 数量妥当 {:.2}, 単位あり {:.2})",
                quality.score,
                quality.extraction_rate,
                quality.average_description_length,
                quality.sane_quantity_ratio,
                quality.unit_ratio
            );
        }

        Commands::Status { job_id } => {
            let store = FileJobStore::new(config.jobs_dir()?);
            let job = store.get(&job_id).await?;
            println!("ジョブ: {}", job.id);
            println!("  状態: {}", job.status);
            println!("  進捗: {}% ({})", job.progress_percent, job.phase_message);
            println!("  照合: {}/{}件", job.matched_items, job.total_items);
            println!("  平均信頼度: {:.2}", job.confidence_score);
            if let Some(message) = &job.error_message {
                println!("  エラー: {}", message);
            }
            println!("  更新: {}", job.updated_at);
        }

        Commands::Cancel { job_id, stop } => {
            let store = FileJobStore::new(config.jobs_dir()?);
            let kind = if stop { CancelKind::Stop } else { CancelKind::Cancel };
            store.request_cancel(&job_id, kind).await?;
            println!("✔ {} を要求しました: {}", if stop { "停止" } else { "キャンセル" }, job_id);
        }

        Commands::Config { set_api_key, show } => {
            let mut config = config;

            if let Some(assignment) = set_api_key {
                let provider = config.set_api_key(&assignment)?;
                println!("✔ {} のAPIキーを設定しました", provider);
            }

            if show {
                let key_state = |key: &Option<String>| if key.is_some() { "設定済み" } else { "未設定" };
                let providers: Vec<String> = config.providers.iter().map(|p| p.to_string()).collect();
                println!("設定:");
                println!("  方式: {}", config.strategy);
                println!("  プロバイダ: {}", providers.join(", "));
                println!("  バッチサイズ: {}", config.batch_size);
                println!("  制限時間: {}秒", config.timeout_seconds);
                println!("  最低信頼度: {:.2}", config.min_confidence);
                println!("  同義語プリセット: {}", config.synonym_preset);
                println!("  Cohere: {} ({})", config.cohere_model, key_state(&config.cohere_api_key));
                println!("  OpenAI: {} ({})", config.openai_model, key_state(&config.openai_api_key));
            }
        }
    }

    Ok(())
}

fn new_job_id() -> String {
    format!("job-{}", chrono::Utc::now().format("%Y%m%d-%H%M%S%3f"))
}

fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// ジョブ記録を読んで進捗表示を更新
async fn watch_progress(store: Arc<dyn JobStore>, job_id: String, pb: ProgressBar) {
    loop {
        tokio::time::sleep(Duration::from_millis(250)).await;
        if let Ok(job) = store.get(&job_id).await {
            pb.set_position(job.progress_percent as u64);
            pb.set_message(job.phase_message.clone());
            if job.status.is_terminal() {
                break;
            }
        }
    }
}
