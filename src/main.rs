use claude_bridge::config::{config_search_paths, EnvCredentials};
use claude_bridge::providers::Provider;
use claude_bridge::{build_router, AppState, ProxyConfig, SharedLogger};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "claude-bridge",
    about = "Serve the Anthropic Messages API on top of OpenAI-compatible providers",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Provider for unprefixed model names: openai, gemini or anthropic
    #[arg(long)]
    preferred_provider: Option<String>,

    /// Log file path
    #[arg(long, default_value = "claude-bridge.log")]
    log_file: PathBuf,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "claude_bridge=info,tower_http=info".into()),
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

    let mut config = ProxyConfig::find_and_load(cli.config.as_deref())?;
    config.apply_env_overrides();

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(provider) = cli.preferred_provider {
        config.preferred_provider = provider.to_lowercase();
    }
    config.validate()?;

    let logger = SharedLogger::new(&cli.log_file)?;
    let credentials = Arc::new(EnvCredentials::from_config(&config));

    info!("╔═══════════════════════════════════════════════════════╗");
    info!("║           claude-bridge v{}                 ║", env!("CARGO_PKG_VERSION"));
    info!("╚═══════════════════════════════════════════════════════╝");
    info!("  Preferred:   {}", config.preferred()?);
    info!("  Big model:   {}", config.big_model);
    info!("  Small model: {}", config.small_model);
    for provider in Provider::ALL {
        let env_var = config.api_key_env(provider);
        let key_state = if std::env::var(&env_var).is_ok_and(|k| !k.trim().is_empty()) {
            "key set"
        } else {
            "no key"
        };
        info!(
            "  {:<10}   {} ({} {})",
            provider.prefix(),
            config.base_url(provider),
            env_var,
            key_state
        );
    }
    info!("  Log file:    {}", cli.log_file.display());

    logger.info(
        "startup",
        format!(
            "Starting claude-bridge preferred={} big={} small={} port={}",
            config.preferred_provider, config.big_model, config.small_model, config.port
        ),
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let bind_addr = format!("{}:{}", config.host, config.port);
    let port = config.port;
    let state = Arc::new(AppState::new(config, credentials, client, logger)?);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("");
    info!("  To use with Claude Code:");
    info!("    ANTHROPIC_BASE_URL=http://localhost:{} claude", port);
    info!("");

    axum::serve(listener, app).await?;

    Ok(())
}
