use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use easel_core::{load_engine, DeviceMap, EngineHandle, FsArtifactStore, Orchestrator};
use easel_server::{build_router, AppState, ServerArgs};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "easel_server=info,easel_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = ServerArgs::parse();

    let engine = load_engine(&args.model, DeviceMap::from_cpu_flag(args.cpu))
        .with_context(|| format!("failed to load engine `{}`", args.model))?;
    let store = FsArtifactStore::open(&args.output_dir)
        .with_context(|| format!("failed to open {}", args.output_dir.display()))?;
    tracing::info!(output_dir = %store.root().display(), "Artifact store ready");

    let orchestrator = Orchestrator::new(
        EngineHandle::new(engine),
        Arc::new(store),
        args.orchestrator_config(),
    );
    let app = build_router(AppState::new(Arc::new(orchestrator), args.delivery));

    let bind_address = args.bind_address();
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {bind_address}"))?;
    tracing::info!(
        address = %listener.local_addr()?,
        policy = %args.policy,
        delivery = %args.delivery,
        "Started server"
    );
    axum::serve(listener, app).await?;

    Ok(())
}
