use anyhow::{Context, Result};
use std::time::Duration;

pub const MAINNET_CHAIN_ID: u64 = 1;

/// Chains the explainer can serve. Anything else is rejected up front.
pub const SUPPORTED_CHAINS: [u64; 1] = [MAINNET_CHAIN_ID];

const DEFAULT_DATABASE_URL: &str = "sqlite:./explainer-cache.db";
const DEFAULT_CACHE_TIME_SECS: u64 = 86_400;
const DEFAULT_MAINNET_RPC_URL: &str = "https://eth.llamarpc.com";
const DEFAULT_ETHERSCAN_API_URL: &str = "https://api.etherscan.io/v2/api";
const DEFAULT_OPENROUTER_MODEL: &str = "openai/gpt-4o-mini";
const DEFAULT_OPENROUTER_API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub cache_ttl: Duration,
    pub mainnet_rpc_urls: Vec<String>,
    pub etherscan_api_key: String,
    pub etherscan_api_url: String,
    pub openrouter_api_key: String,
    pub openrouter_model: String,
    pub openrouter_api_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str, default: &str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let cache_secs = match lookup("DEFAULT_CACHE_TIME") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .context("DEFAULT_CACHE_TIME must be a number of seconds")?,
            None => DEFAULT_CACHE_TIME_SECS,
        };

        let mainnet_rpc_urls: Vec<String> = var("MAINNET_RPC_URL", DEFAULT_MAINNET_RPC_URL)
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect();

        let openrouter_api_key = lookup("OPENROUTER_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .context("OPENROUTER_API_KEY must be set in .env")?;

        Ok(Config {
            database_url: var("DATABASE_URL", DEFAULT_DATABASE_URL),
            cache_ttl: Duration::from_secs(cache_secs),
            mainnet_rpc_urls,
            etherscan_api_key: var("MAINNET_ETHERSCAN_API_KEY", ""),
            etherscan_api_url: var("ETHERSCAN_API_URL", DEFAULT_ETHERSCAN_API_URL),
            openrouter_api_key,
            openrouter_model: var("OPENROUTER_MODEL_NAME", DEFAULT_OPENROUTER_MODEL),
            openrouter_api_url: var("OPENROUTER_API_URL", DEFAULT_OPENROUTER_API_URL),
        })
    }
}
