use clap::Parser;
use fal_router_proxy::config::config_search_paths;
use fal_router_proxy::{build_router, AppState, PricingCache, ProxyConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "fal-router-proxy",
    about = "Anthropic Messages API in front of an OpenAI-compatible router, with cache-aware usage",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Provider preset name (overrides config)
    #[arg(long)]
    provider: Option<String>,

    /// Skip the remote pricing table and use built-in prices only
    #[arg(long)]
    offline_pricing: bool,

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
                .unwrap_or_else(|_| "fal_router_proxy=info,tower_http=info".into()),
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

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(provider) = cli.provider {
        config.provider.name = provider;
    }
    if cli.offline_pricing {
        config.pricing.enabled = false;
    }

    // Validate config eagerly
    let base_url = config.effective_base_url()?;
    let auth_scheme = config.auth_scheme()?;

    if config.fallback_api_key().is_none() {
        warn!(
            env = config.api_key_env().unwrap_or("-"),
            "No fallback API key set; clients must send their own"
        );
    }

    info!("fal-router-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("  Provider:  {} ({:?} auth)", config.provider.name, auth_scheme);
    info!("  Base URL:  {}", base_url);
    info!("  Port:      {}", config.port);
    info!("  Aliases:   {} mapped", config.models.len());
    info!(
        "  Pricing:   {}",
        if config.pricing.enabled { config.pricing.url.as_str() } else { "built-in only" }
    );

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(300))
        .build()?;

    let pricing = if config.pricing.enabled {
        Arc::new(PricingCache::new(
            config.pricing.url.clone(),
            chrono::Duration::hours(config.pricing.ttl_hours),
        ))
    } else {
        Arc::new(PricingCache::offline())
    };

    if config.pricing.enabled {
        let pricing = Arc::clone(&pricing);
        let client = client.clone();
        tokio::spawn(async move {
            if let Err(e) = pricing.refresh(&client).await {
                warn!(error = %e, "Initial pricing fetch failed, will retry on demand");
            }
        });
    }

    let port = config.port;
    let state = Arc::new(AppState {
        config,
        client,
        pricing,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);
    info!("  ANTHROPIC_BASE_URL=http://localhost:{}", port);

    axum::serve(listener, app).await?;

    Ok(())
}
