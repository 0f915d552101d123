mod error;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use clap::Parser;
use lendguard_control::SystemConfig;
use lendguard_kernel::SecurityKernel;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::handlers::*;
use crate::state::{build_kernel, create_default_config, load_config, AppState};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "lendguard.toml")]
    config: PathBuf,
    #[arg(long, default_value = "0.0.0.0:8080")]
    listen: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    if !args.config.exists() {
        warn!("config file missing, creating default config");
        let _ = create_default_config(&args.config);
    }

    let (_raw, config) = load_config(&args.config)?;
    let kernel = Arc::new(build_kernel(&config)?);
    spawn_background_tasks(kernel.clone(), &config);
    let state = Arc::new(AppState::new(&config, kernel));

    let app = router(state);
    info!("lendguard-server listening on {}", args.listen);
    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .route("/events", get(list_events))
        .route("/events/stream", get(event_stream))
        .route("/alerts", get(list_alerts))
        .route("/alerts/:id", put(update_alert))
        .route("/anomalies", get(list_anomalies))
        .route("/metrics", get(get_metrics))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    let protected_routes = Router::new()
        .route("/functions/encrypt-field", post(encrypt_field))
        .route("/functions/decrypt-field", post(decrypt_field))
        .route("/api/security/events", post(log_event))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    Router::new()
        .route("/health", get(health))
        .route("/functions/geo-check", post(geo_check))
        .route("/functions/verify-webhook", post(verify_webhook))
        .route("/functions/validate-form", post(validate_form))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/:id", delete(terminate_session))
        .route("/api/sessions/:id/validate", post(validate_session))
        .route("/api/security/risk", post(assess_risk))
        .route("/api/security/rate-limit", post(check_rate_limit))
        .route("/api/security/inspect", post(inspect))
        .route("/api/errors/sanitize", post(sanitize_error))
        .merge(protected_routes)
        .nest("/api/admin", admin_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn interval_secs(config: &SystemConfig, key: &str) -> Duration {
    Duration::from_secs(config.get_number(key).max(1) as u64)
}

fn spawn_background_tasks(kernel: Arc<SecurityKernel>, config: &SystemConfig) {
    let metrics_every = interval_secs(config, "monitor.metrics_interval_seconds");
    let sweep_every = interval_secs(config, "session.validation_interval_seconds");

    let metrics_kernel = kernel.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(metrics_every);
        loop {
            ticker.tick().await;
            let kernel = metrics_kernel.clone();
            match tokio::task::spawn_blocking(move || kernel.monitor().refresh()).await {
                Ok(Ok(metrics)) => debug!(
                    security_score = metrics.security_score,
                    open_alerts = metrics.open_alerts,
                    "security metrics refreshed"
                ),
                Ok(Err(err)) => warn!(error = %err, "metrics refresh failed"),
                Err(err) => warn!(error = %err, "metrics task panicked"),
            }
        }
    });

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            let sweeper = kernel.clone();
            let result = tokio::task::spawn_blocking(move || {
                let pruned = sweeper.prune_rate_limits();
                sweeper.monitor().sweep_sessions().map(|closed| (closed.len(), pruned))
            })
            .await;
            match result {
                Ok(Ok((closed, pruned))) => {
                    debug!(closed_sessions = closed, pruned_scopes = pruned, "session sweep done")
                }
                Ok(Err(err)) => warn!(error = %err, "session sweep failed"),
                Err(err) => warn!(error = %err, "session sweep task panicked"),
            }
        }
    });
}
