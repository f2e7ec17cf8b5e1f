//! Prints the account details using a stored token.
//!
//! Rotated tokens are written back to the same file, so repeated runs keep
//! working after the access token expires.
//!
//! Usage: `account_info [token-file]`

use amocrm_api_client::config::Config;
use amocrm_api_client::{ApiClient, TokenState};
use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "amocrm_api_client=debug,account_info=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let token_file = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("AMOCRM_TOKEN_FILE").ok())
        .unwrap_or_else(|| "amocrm_token.json".to_string());

    let config = Config::from_env()?;
    let base_domain = config
        .base_domain
        .clone()
        .context("AMOCRM_BASE_DOMAIN environment variable required")?;

    let raw = std::fs::read_to_string(&token_file)
        .with_context(|| format!("Failed to read {}", token_file))?;
    let token: TokenState =
        serde_json::from_str(&raw).with_context(|| format!("Invalid token file {}", token_file))?;

    let mut client = ApiClient::from_config(&config)?;
    client.set_account_base_domain(&base_domain)?;
    client.set_access_token(token);

    let path = token_file.clone();
    client.on_access_token_refresh(move |rotated| {
        match serde_json::to_string_pretty(rotated) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    tracing::error!("Failed to persist rotated token to {}: {}", path, e);
                } else {
                    tracing::info!("Rotated token persisted to {}", path);
                }
            }
            Err(e) => tracing::error!("Failed to serialize rotated token: {}", e),
        }
    });

    let account = client.account()?.get(&["users_groups"]).await?;
    println!("{}", serde_json::to_string_pretty(&account)?);

    Ok(())
}
