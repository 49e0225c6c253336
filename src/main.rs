//! agent-dispatch - HTTP Server Entry Point

use agent_dispatch::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_dispatch=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        "Loaded configuration: cores=[{}], tenants={}, agent_timeout={:?}, anonymous={}",
        config.cores.join(", "),
        config.tenants.len(),
        config.agent_timeout,
        config.allow_anonymous
    );
    if let Some(dir) = &config.agents_dir {
        info!("Agent manifests directory: {}", dir.display());
    }

    api::serve(config).await?;

    Ok(())
}
