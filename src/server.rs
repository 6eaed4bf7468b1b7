/// HTTP server setup and routing
use crate::{
    api::{self, middleware::authenticate},
    context::AppContext,
    error::{LinkError, LinkResult},
    rate_limit::rate_limit_middleware,
    response::ApiResponse,
};
use axum::{
    http::{header, Method, StatusCode},
    middleware,
    response::Json,
    routing::get,
    Router,
};
use serde_json::json;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

/// Build the main application router
/// Returns Router<()> because state is already provided
pub fn build_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let prefix = ctx.config.service.api_prefix.trim_end_matches('/').to_string();
    let router = Router::new().route("/health", get(health_check));
    // axum refuses to nest at the root
    let router = if prefix.is_empty() {
        router.merge(api::routes())
    } else {
        router.nest(&prefix, api::routes())
    };

    router
        .with_state(ctx.clone())
        // Runs after rate limiting: authentication touches the stores
        .layer(middleware::from_fn_with_state(ctx.clone(), authenticate))
        // Set after the interceptor so unknown paths are 404, not 401
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(ctx, rate_limit_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Health check handler
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// 404 handler
async fn not_found() -> (StatusCode, Json<ApiResponse<()>>) {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::error(10404, "Endpoint not found")),
    )
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

/// Start the HTTP server and run until a shutdown signal
pub async fn serve(ctx: AppContext) -> LinkResult<()> {
    let addr = format!("{}:{}", ctx.config.service.hostname, ctx.config.service.port);

    info!("SAST Link listening on {}", addr);
    info!("   Public URL: {}", ctx.config.service.public_url);
    info!("   API prefix: {}", ctx.config.service.api_prefix);

    let app = build_router(ctx);

    let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
        tracing::error!("Failed to bind to {}: {}", addr, e);
        LinkError::Io(e)
    })?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
