use clap::Parser;
use flatten_etl::app::pipelines::flatten_pipeline::{parse_records, query_to_csv};
use flatten_etl::core::profiler::profile;
use flatten_etl::core::{ConfigProvider, RulePlanner, Storage};
use flatten_etl::utils::{error::EtlError, logger, validation::Validate};
use flatten_etl::{
    CatalogPlanner, EtlEngine, FlattenPipeline, LocalStorage, SqliteTableStore, TomlConfig,
};

#[derive(Parser)]
#[command(name = "toml-etl")]
#[command(about = "Flatten ETL driven by a TOML configuration file")]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "etl-config.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Override the table name from config
    #[arg(long)]
    table: Option<String>,

    /// Profile and plan only; print the rule list without loading anything
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // 初始化日誌
    logger::init_cli_logger(args.verbose, args.log_json);

    tracing::info!("🚀 Starting TOML-based flatten ETL");
    tracing::info!("📁 Loading configuration from: {}", args.config);

    // 載入 TOML 配置
    let mut config = match TomlConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", args.config, e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(e.category().exit_code());
        }
    };

    // 應用命令列覆蓋設定
    if let Some(table) = &args.table {
        config.load.table_name = table.clone();
        tracing::info!("🔧 Table name overridden to: {}", table);
    }

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(e.category().exit_code());
    }

    tracing::info!("✅ Configuration loaded and validated successfully");
    display_config_summary(&config, &args);

    let result = if args.dry_run {
        perform_dry_run(&config).await
    } else {
        run(config).await
    };

    if let Err(e) = result {
        tracing::error!(
            "❌ ETL run failed at {} stage: {} (Category: {:?})",
            e.stage(),
            e,
            e.category()
        );
        tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ [{}] {}", e.stage(), e.user_friendly_message());
        eprintln!("💡 建議: {}", e.recovery_suggestion());
        std::process::exit(e.category().exit_code());
    }
}

async fn run(config: TomlConfig) -> Result<(), EtlError> {
    let store = SqliteTableStore::in_memory().await?;
    let pipeline = FlattenPipeline::new(LocalStorage::new("."), config, store);

    let summary = EtlEngine::new(pipeline).run().await?;
    eprintln!(
        "✅ Loaded {} rows into '{}' in {} ms",
        summary.handle.row_count,
        summary.handle.name,
        summary.elapsed_ms()
    );

    let csv = query_to_csv(&summary.verification)?;
    print!("{}", String::from_utf8_lossy(&csv));
    Ok(())
}

fn display_config_summary(config: &TomlConfig, args: &Args) {
    eprintln!("📋 Configuration Summary:");
    eprintln!(
        "  Pipeline: {} v{}",
        config.pipeline.name, config.pipeline.version
    );
    eprintln!("  Input: {}", config.input_path());
    eprintln!("  Sample size: {}", config.sample_size());
    eprintln!("  Table: {}", config.table_name());
    eprintln!("  Heuristics: {}", config.catalog().heuristics.len());

    if let Some(path) = config.export_path() {
        eprintln!("  CSV export: {}", path);
    }

    if args.dry_run {
        eprintln!("  🔍 DRY RUN MODE ENABLED");
    }

    eprintln!();
}

async fn perform_dry_run(config: &TomlConfig) -> Result<(), EtlError> {
    let storage = LocalStorage::new(".");
    let bytes = storage.read_file(config.input_path()).await.map_err(|e| EtlError::Ingestion {
        source_name: config.input_path().to_string(),
        message: e.to_string(),
    })?;
    let records = parse_records(config.input_path(), &bytes)?;

    let samples = config.sample_size().min(records.len());
    let summary = profile(&records[..samples])?;
    let plan = CatalogPlanner::new(config.catalog().clone()).plan(&summary)?;

    println!("🔍 Dry Run Analysis:");
    println!("  Records: {}, profiled: {}", records.len(), samples);
    println!();
    println!("🧩 Rules:");
    for entry in &plan.log.entries {
        println!("  {} [{:?}: {}]", entry.rule, entry.heuristic, entry.note);
    }

    if !plan.log.conflicts.is_empty() {
        println!();
        println!("⚠️ Conflicts:");
        for conflict in &plan.log.conflicts {
            println!(
                "  {}: kept {}, discarded {} ({})",
                conflict.path, conflict.kept, conflict.discarded, conflict.reason
            );
        }
    }

    Ok(())
}
