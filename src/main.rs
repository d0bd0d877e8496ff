use chat_bridge::config::{config_search_paths, Backend, BridgeConfig, ProviderConfig};
use chat_bridge::host::scripted::ECHO_MODEL_ID;
use chat_bridge::host::upstream::http_client;
use chat_bridge::host::{HostModel, ScriptedModel, UpstreamModel};
use chat_bridge::{build_router, AppState, ModelSelector, SharedJournal};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "chat-bridge",
    about = "Serve one chat model through the OpenAI Chat, OpenAI Responses and Anthropic Messages APIs",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Upstream provider preset (overrides config)
    #[arg(long)]
    provider: Option<String>,

    /// Serve the built-in echo model instead of an upstream provider
    #[arg(long, conflicts_with = "provider")]
    echo: bool,

    /// Persist the request journal to this JSONL file
    #[arg(long)]
    journal: Option<PathBuf>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_bridge=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = BridgeConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ref provider) = cli.provider {
        config.provider = Some(ProviderConfig {
            name: provider.clone(),
            base_url: None,
            api_key_env: None,
        });
        config.backend = Some(Backend::Upstream);
    }
    if cli.echo {
        config.backend = Some(Backend::Echo);
    }

    let journal = match cli.journal {
        Some(ref path) => SharedJournal::open(path)?,
        None => SharedJournal::in_memory(),
    };

    let (host, default_model): (Arc<dyn HostModel>, String) = match config.effective_backend() {
        Backend::Echo => (
            Arc::new(ScriptedModel::echo()),
            config
                .default_model
                .clone()
                .unwrap_or_else(|| ECHO_MODEL_ID.to_string()),
        ),
        Backend::Upstream => {
            let client = http_client()?;
            let upstream = UpstreamModel::from_config(&config, client)?;
            let default_model = config.effective_default_model().ok_or_else(|| {
                anyhow::anyhow!("No default_model configured and the provider has no preset default")
            })?;
            (Arc::new(upstream), default_model)
        }
    };

    info!("╔═══════════════════════════════════════════════════════╗");
    info!("║           chat-bridge v{}                          ║", env!("CARGO_PKG_VERSION"));
    info!("╚═══════════════════════════════════════════════════════╝");
    match config.effective_backend() {
        Backend::Echo => info!("  Backend:   echo"),
        Backend::Upstream => {
            let name = config.provider.as_ref().map(|p| p.name.as_str()).unwrap_or("");
            info!("  Backend:   upstream ({})", name);
            info!("  Base URL:  {}", config.effective_base_url()?);
        }
    }
    info!("  Default:   {}", default_model);
    info!("  Aliases:   {} mapped", config.models.len());
    info!("  Port:      {}", config.port);
    if let Some(ref path) = cli.journal {
        info!("  Journal:   {}", path.display());
    }

    let selector = ModelSelector::from_config(&config, default_model);
    let state = Arc::new(AppState::new(host, selector, journal));
    let shutdown = state.shutdown.clone();

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("");
    info!("  OpenAI clients:    OPENAI_BASE_URL=http://localhost:{}/v1", config.port);
    info!("  Anthropic clients: ANTHROPIC_BASE_URL=http://localhost:{}", config.port);
    info!("  Claude Code:       ANTHROPIC_BASE_URL=http://localhost:{}/claude-code claude", config.port);
    info!("");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down, cancelling in-flight generations");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
