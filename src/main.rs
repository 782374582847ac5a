use clap::Parser;
use flatten_etl::app::pipelines::flatten_pipeline::query_to_csv;
use flatten_etl::utils::{error::EtlError, logger, validation::Validate};
use flatten_etl::{CliConfig, EtlEngine, FlattenPipeline, LocalStorage, SqliteTableStore};

#[tokio::main]
async fn main() {
    let mut config = CliConfig::parse();

    // 初始化日誌
    logger::init_cli_logger(config.verbose, config.log_json);

    tracing::info!("Starting flatten-etl CLI");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    // 載入規則目錄並驗證配置
    if let Err(e) = config.load_catalog().and_then(|_| config.validate()) {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(e.category().exit_code());
    }

    if let Err(e) = run(config).await {
        fail(e);
    }
}

async fn run(config: CliConfig) -> Result<(), EtlError> {
    let storage = LocalStorage::new(".");
    let store = SqliteTableStore::in_memory().await?;
    let pipeline = FlattenPipeline::new(storage, config, store);

    let summary = EtlEngine::new(pipeline).run().await?;

    for conflict in &summary.plan.log.conflicts {
        eprintln!("⚠️ {}: kept {}, discarded {}", conflict.path, conflict.kept, conflict.discarded);
    }
    eprintln!(
        "✅ Loaded {} of {} records into '{}' ({} recovered issues)",
        summary.report.row_count,
        summary.input_records,
        summary.handle.name,
        summary.report.issues.len()
    );

    let csv = query_to_csv(&summary.verification)?;
    print!("{}", String::from_utf8_lossy(&csv));
    Ok(())
}

fn fail(e: EtlError) -> ! {
    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ ETL run failed at {} stage: {} (Category: {:?})",
        e.stage(),
        e,
        e.category()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    // 輸出用戶友好的錯誤信息
    eprintln!("❌ [{}] {}", e.stage(), e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    std::process::exit(e.category().exit_code());
}
