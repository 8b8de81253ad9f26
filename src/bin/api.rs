use crypto_analyst::{
    agent::build_default_driver,
    api::{start_server, ApiState},
    config::Settings,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;

    info!(
        app = %settings.app_name,
        version = %settings.app_version,
        host = %settings.api_host,
        port = settings.api_port,
        max_invocations = settings.max_invocations,
        "Crypto analyst API starting"
    );
    if settings.llm_api_key.is_empty() {
        warn!("DEEPSEEK_API_KEY is not set; model calls will fail");
    }
    if settings.news_database_url.is_none() {
        warn!("NEWS_DATABASE_URL is not set; news capabilities will report errors");
    }

    let driver = Arc::new(build_default_driver(&settings)?);
    start_server(ApiState::new(driver, settings)).await?;

    Ok(())
}
