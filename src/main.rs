//! Canopy registry server binary.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use canopy::authz::StaticTokenVerifier;
use canopy::authz::TokenVerifier;
use canopy::authz::VerifiedToken;
use canopy::config::AppConfig;
use canopy::server::build_router;
use canopy::state::AppState;

/// Agent registry and discovery service.
#[derive(Debug, Parser)]
#[command(name = "canopy", version, about)]
struct Args {
    /// Socket address to serve on.
    #[arg(long, env = "HTTP_BIND", default_value = "0.0.0.0:8080")]
    bind: String,

    /// JSON file mapping bearer tokens to claims, for embedded deployments
    /// without an external token issuer.
    #[arg(long, env = "REGISTRY_AUTH_TOKENS_FILE")]
    auth_tokens_file: Option<std::path::PathBuf>,

    /// Log filter, e.g. `info` or `canopy=debug`.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn load_verifier(args: &Args) -> anyhow::Result<Arc<dyn TokenVerifier>> {
    let verifier = StaticTokenVerifier::new();
    if let Some(path) = &args.auth_tokens_file {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading auth tokens from {}", path.display()))?;
        let table: HashMap<String, VerifiedToken> =
            serde_json::from_str(&raw).context("parsing auth token table")?;
        let count = table.len();
        for (token, claims) in table {
            verifier.insert(token, claims);
        }
        info!(tokens = count, "loaded static auth token table");
    } else {
        info!("no auth token table configured, serving public endpoints only");
    }
    Ok(Arc::new(verifier))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_target(false)
        .compact()
        .init();

    let config = AppConfig::load().context("loading configuration")?;
    let verifier = load_verifier(&args)?;
    let state = AppState::in_memory(config, verifier)
        .map_err(|err| anyhow::anyhow!("wiring application state: {err}"))?;
    state.start();

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    info!(bind = %args.bind, "canopy registry listening");

    let app = build_router(state.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("serving")?;

    state.stop().await;
    info!("canopy registry stopped");
    Ok(())
}
