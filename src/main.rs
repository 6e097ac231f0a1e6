use std::sync::Arc;

use intake_assist::channels::{Channel, ChannelManager, CliChannel, TelegramChannel};
use intake_assist::config::IntakeConfig;
use intake_assist::intake::{
    ConversationStore, IntakeEngine, IntakeService, PlanSynthesizer, QuestionCatalog,
    TranscriptWriter,
};
use intake_assist::llm::create_provider;
use intake_assist::store::{LibSqlBackend, TranscriptStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = IntakeConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export TELEGRAM_BOT_TOKEN=... (or INTAKE_CLI=1 for a local session)");
        eprintln!("  export OPENAI_API_KEY=sk-...");
        std::process::exit(1);
    });

    eprintln!("📋 Intake Assist v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {} (max {} tokens)", config.model, config.max_tokens);

    // ── Database ─────────────────────────────────────────────────────────
    let store: Arc<dyn TranscriptStore> = Arc::new(
        LibSqlBackend::connect(&config.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {}: {}", config.db_path, e);
                std::process::exit(1);
            }),
    );
    eprintln!("   Database: {}", config.db_path);

    // ── LLM ──────────────────────────────────────────────────────────────
    let llm = create_provider(config.llm_backend, &config.llm_api_key, &config.model)?;

    // ── Channels ─────────────────────────────────────────────────────────
    let mut channels = ChannelManager::new();

    if let Some(telegram) = &config.telegram {
        eprintln!(
            "   Telegram: enabled (allowed: {})",
            if telegram.allowed_users.iter().any(|u| u == "*") {
                "everyone".to_string()
            } else {
                telegram.allowed_users.join(", ")
            }
        );
        channels.add(Box::new(TelegramChannel::new(
            telegram.bot_token.clone(),
            telegram.allowed_users.clone(),
        )));
    }

    if config.cli_enabled {
        eprintln!("   CLI: enabled");
        channels.add(Box::new(CliChannel));
    }

    eprintln!("   Channels: {}\n", channels.names().join(", "));

    let channels = Arc::new(channels);
    if let Err(e) = channels.health_check_all().await {
        tracing::warn!(error = %e, "Channel health check failed");
    }
    let stream = channels.start_all().await?;

    // ── Intake ───────────────────────────────────────────────────────────
    let (transcripts, transcript_worker) = TranscriptWriter::spawn(store);
    let conversations = Arc::new(ConversationStore::new());
    let idle_sweep = config.idle_timeout.map(|max_idle| {
        tracing::info!(max_idle_secs = max_idle.as_secs(), "Idle intake sweep enabled");
        conversations.spawn_idle_sweep(max_idle)
    });
    let engine = IntakeEngine::new(
        QuestionCatalog::default(),
        conversations,
        PlanSynthesizer::new(llm).with_max_tokens(config.max_tokens),
        transcripts,
    );

    let service = Arc::new(IntakeService::new(
        Arc::new(engine),
        Arc::clone(&channels) as Arc<dyn Channel>,
    ));
    Arc::clone(&service).run(stream).await;

    if let Some(sweep) = idle_sweep {
        sweep.abort();
    }

    // Dropping the last writer lets the worker drain its queue and exit.
    drop(service);
    match transcript_worker.await {
        Ok(totals) => tracing::info!(
            written = totals.written,
            failed = totals.failed,
            "Pending transcripts flushed"
        ),
        Err(e) => tracing::error!(error = %e, "Transcript worker failed"),
    }

    channels.shutdown_all().await;
    Ok(())
}
