use lab_sandbox::{lifecycle::Lifecycle, models::config_models::Config};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    // RUST_LOG wins over the configured filter
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.filter))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        sweeper = config.sweeper.enabled,
        "starting lab sandbox"
    );
    Lifecycle::build(config).await?.run().await?;
    Ok(())
}
