/// SAST Link - campus identity backend
///
/// Ticket-based email verification, access tokens, and an embedded OAuth2
/// authorization server for campus applications.
use sast_link::{config::ServerConfig, context::AppContext, server};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = ServerConfig::from_env()?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sast_link=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    tracing::info!("SAST Link v{}", env!("CARGO_PKG_VERSION"));

    // Create application context
    let ctx = AppContext::new(config).await?;

    // Start background jobs
    let gc = ctx
        .oauth
        .tokens()
        .start_gc(Duration::from_secs(ctx.config.oauth.gc_interval));

    // Start server
    let result = server::serve(ctx).await;

    if let Some(gc) = gc {
        gc.shutdown().await;
    }

    result?;
    Ok(())
}
