use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use shopsage::{
    config::Config,
    graph::{state::RunState, Graph, NodeId, PipelineContext},
    llm::LlmClient,
    sources::{LensIdentifier, ShoppingClient, TavilyClient},
    storage::{SqliteStorage, Storage},
};

/// Photograph a product, get a vetted recommendation.
#[derive(Parser)]
#[command(name = "shopsage", version, about)]
struct Cli {
    /// The user's message for this turn
    query: String,

    /// Product photo to identify (starts a new analysis)
    #[arg(short, long)]
    image: Option<PathBuf>,

    /// Conversation to continue; omit to start a new one
    #[arg(short, long)]
    conversation: Option<String>,

    /// Preference scope for saved weights and learned choices
    #[arg(short, long, default_value = "default")]
    user: String,

    /// Identify the product and stop, skipping the rest of the pipeline
    #[arg(long)]
    detect_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "ShopSage starting...");

    // Initialize storage
    let storage: Arc<SqliteStorage> = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            Arc::new(s)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    // Initialize the LLM client and search collaborators
    let llm = Arc::new(LlmClient::new(&config.llm, config.request.clone())?);
    let identifier = Arc::new(LensIdentifier::new(&config.search, &config.request)?);
    let tavily = Arc::new(TavilyClient::new(&config.search, &config.request)?);
    let shopping = Arc::new(ShoppingClient::new(&config.search, &config.request)?);

    let graph = Graph::new(PipelineContext::new(
        llm,
        identifier,
        tavily.clone(),
        shopping,
        tavily,
        storage.clone(),
        config.llm.models.clone(),
        config.graph.clone(),
    ));

    let state = build_state(&cli, storage.as_ref()).await?;
    let conversation_id = state.conversation_id.clone();

    let final_state = match graph.run(NodeId::Router, state).await {
        Ok(state) => state,
        Err(e) => {
            error!(error = %e, "Pipeline run failed");
            return Err(e.into());
        }
    };

    // The payload goes to stdout; everything else went to stderr.
    let output = serde_json::json!({
        "conversation_id": conversation_id,
        "recommendation": final_state.final_recommendation,
        "product": final_state.product_query,
        "node_timings_ms": final_state.node_timings,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

/// Assemble the run state: fresh for a new conversation, resumed from the
/// persisted snapshot for a follow-up.
async fn build_state(cli: &Cli, storage: &SqliteStorage) -> anyhow::Result<RunState> {
    let image_base64 = match &cli.image {
        Some(path) => {
            let bytes = std::fs::read(path)?;
            Some(BASE64.encode(bytes))
        }
        None => None,
    };

    let state = match &cli.conversation {
        Some(conversation_id) => {
            let snapshot = storage.load_snapshot(conversation_id).await?;
            let history = storage.get_chat_history(conversation_id, 20).await?;
            match snapshot {
                Some(snapshot) => {
                    info!(conversation_id = %conversation_id, "Resuming conversation");
                    RunState::resume(conversation_id.clone(), cli.query.clone(), &snapshot, history)
                }
                None => {
                    info!(conversation_id = %conversation_id, "No snapshot found, starting fresh");
                    RunState::new(conversation_id.clone(), cli.query.clone())
                }
            }
        }
        None => RunState::new(Uuid::new_v4().to_string(), cli.query.clone()),
    };

    let mut state = state.with_user_id(cli.user.clone()).with_detect_only(cli.detect_only);
    if let Some(image) = image_base64 {
        state = state.with_image(image);
        // A fresh image restarts identification even on a resumed turn.
        state.skip_vision = false;
        state.product_query = None;
    }

    Ok(state)
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        shopsage::config::LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        shopsage::config::LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
