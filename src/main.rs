use std::sync::Arc;
use std::time::Duration;

use inbox_triage::channels::{
    FileMailbox, GroupChatProvider, HttpChatConfig, HttpGroupChat, MailboxProvider,
};
use inbox_triage::classify::{ClassificationClient, ClassifierConfig, HttpClassifierModel};
use inbox_triage::config::EngineConfig;
use inbox_triage::escalation::{ResponderDirectory, TeamAssembler};
use inbox_triage::pipeline::{BatchCoordinator, MessageProcessor, spawn_cycle_loop};
use inbox_triage::resilience::CircuitBreaker;
use inbox_triage::store::MemoryStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Invalid configuration is fatal here, never a runtime condition.
    let config = EngineConfig::from_env()?;

    let classifier_config = ClassifierConfig::from_env().unwrap_or_else(|| {
        eprintln!("Error: CLASSIFIER_URL not set");
        eprintln!("  export CLASSIFIER_URL=https://api.example.com/v1/chat/completions");
        std::process::exit(1);
    });

    let mailbox_path =
        std::env::var("TRIAGE_MAILBOX_FILE").unwrap_or_else(|_| "./data/inbox.jsonl".to_string());
    let poll_interval_secs: u64 = std::env::var("TRIAGE_POLL_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(60);

    let directory = Arc::new(ResponderDirectory::from_env());

    eprintln!("📬 inbox-triage v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Classifier: {}", classifier_config.model);
    eprintln!(
        "   Thresholds: auto {} / suggest {} / review {}",
        config.thresholds.auto_handle,
        config.thresholds.suggest_response,
        config.thresholds.human_review
    );
    eprintln!("   Mailbox: {mailbox_path} (poll every {poll_interval_secs}s)");
    eprintln!(
        "   Responders: {} ({} fallback: {})",
        directory.len(),
        if directory.is_empty() { "only" } else { "plus" },
        config.escalation.fallback_responder
    );

    let classifier = Arc::new(ClassificationClient::new(
        Arc::new(HttpClassifierModel::new(classifier_config)),
        &config.resilience,
    ));

    let chat: Arc<dyn GroupChatProvider> = match HttpChatConfig::from_env() {
        Some(chat_config) => {
            eprintln!("   Group chat: {}", chat_config.base_url);
            Arc::new(HttpGroupChat::new(chat_config))
        }
        None => {
            eprintln!("Error: CHAT_URL not set");
            eprintln!("  export CHAT_URL=https://chat.example.com/api");
            std::process::exit(1);
        }
    };

    let mailbox: Arc<dyn MailboxProvider> = Arc::new(FileMailbox::new(&mailbox_path));
    let store = Arc::new(MemoryStore::new());
    let mailbox_breaker = Arc::new(CircuitBreaker::from_config("mailbox", &config.resilience));

    let assembler = Arc::new(TeamAssembler::new(
        chat,
        directory,
        config.escalation.clone(),
        &config.resilience,
    ));
    let processor = Arc::new(MessageProcessor::new(
        classifier,
        Arc::clone(&mailbox),
        assembler,
        Arc::clone(&store) as _,
        config.thresholds.clone(),
        &config.resilience,
        Arc::clone(&mailbox_breaker),
    ));
    let coordinator = Arc::new(BatchCoordinator::new(
        mailbox,
        processor,
        store,
        config.batch.clone(),
        &config.resilience,
        mailbox_breaker,
    ));

    let (handle, shutdown) =
        spawn_cycle_loop(coordinator, Duration::from_secs(poll_interval_secs));

    tokio::signal::ctrl_c().await?;
    eprintln!("Shutting down after current cycle…");
    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    handle.await?;

    Ok(())
}
