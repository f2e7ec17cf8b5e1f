//! Exchanges an authorization code for the first token pair and stores it.
//!
//! Usage: `exchange_code <code> [token-file]`

use amocrm_api_client::config::Config;
use amocrm_api_client::ApiClient;
use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "amocrm_api_client=debug,exchange_code=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let code = args
        .next()
        .context("usage: exchange_code <code> [token-file]")?;
    let token_file = args
        .next()
        .or_else(|| std::env::var("AMOCRM_TOKEN_FILE").ok())
        .unwrap_or_else(|| "amocrm_token.json".to_string());

    let config = Config::from_env()?;
    if config.base_domain.is_none() {
        anyhow::bail!("AMOCRM_BASE_DOMAIN environment variable required");
    }

    let client = ApiClient::from_config(&config)?;
    let token = client.oauth_client().exchange_authorization_code(&code).await?;

    std::fs::write(&token_file, serde_json::to_string_pretty(&token)?)
        .with_context(|| format!("Failed to write {}", token_file))?;

    tracing::info!("Token stored in {} (expires at {})", token_file, token.expires_at);
    Ok(())
}
