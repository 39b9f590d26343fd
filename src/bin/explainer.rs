use anyhow::Result;
use clap::{Parser, Subcommand};
use contract_explainer::cache::{Cache, SqliteCacheStore};
use contract_explainer::cli::commands::{
    TransactionsQuery, cmd_contract, cmd_explain_contract, cmd_explain_transaction,
    cmd_prune_cache, cmd_transaction, cmd_transactions,
};
use contract_explainer::cli::formatters::OutputFormat;
use contract_explainer::config::{Config, MAINNET_CHAIN_ID, SUPPORTED_CHAINS};
use contract_explainer::discovery::EtherscanDiscovery;
use contract_explainer::llm::OpenRouterClient;
use contract_explainer::rpc::{ChainClient, RpcClient};
use contract_explainer::service::ExplainerService;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "explainer")]
#[command(about = "Explain smart contracts and their transactions", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "table")]
    format: String,

    #[arg(long, default_value_t = MAINNET_CHAIN_ID)]
    chain_id: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transactions that emitted events from the contract
    Transactions {
        address: String,

        #[arg(long)]
        from_block: Option<u64>,

        #[arg(long)]
        to_block: Option<u64>,
    },
    Transaction {
        address: String,
        hash: String,
    },
    /// ABI and verified sources
    Contract {
        address: String,
    },
    ExplainContract {
        address: String,
    },
    ExplainTransaction {
        address: String,
        hash: String,
    },
    /// Delete expired cache entries
    PruneCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());

    let config = Config::from_env()?;
    info!("Configuration loaded");

    let store = Arc::new(SqliteCacheStore::open(&config.database_url)?);
    info!("Cache database opened at {}", config.database_url);

    if let Commands::PruneCache = cli.command {
        return cmd_prune_cache(&store).await;
    }

    let rpc = RpcClient::new(&config.mainnet_rpc_urls)?;
    info!(
        "RPC URLs: {} endpoint(s) configured",
        config.mainnet_rpc_urls.len()
    );

    let mut chains: HashMap<u64, Arc<dyn ChainClient>> = HashMap::new();
    chains.insert(MAINNET_CHAIN_ID, Arc::new(rpc));

    let discovery = EtherscanDiscovery::new(
        config.etherscan_api_url.clone(),
        config.etherscan_api_key.clone(),
        SUPPORTED_CHAINS.to_vec(),
    );
    let llm = OpenRouterClient::new(
        config.openrouter_api_url.clone(),
        config.openrouter_api_key.clone(),
        config.openrouter_model.clone(),
    );

    let service = ExplainerService::new(
        chains,
        Arc::new(discovery),
        Arc::new(llm),
        Cache::new(store, config.cache_ttl),
    );

    let chain_id = cli.chain_id;
    match cli.command {
        Commands::Transactions {
            address,
            from_block,
            to_block,
        } => {
            let query = TransactionsQuery {
                chain_id,
                address,
                from_block,
                to_block,
            };
            cmd_transactions(&service, query, &format).await?;
        }
        Commands::Transaction { address, hash } => {
            cmd_transaction(&service, chain_id, &address, &hash, &format).await?;
        }
        Commands::Contract { address } => {
            cmd_contract(&service, chain_id, &address, &format).await?;
        }
        Commands::ExplainContract { address } => {
            cmd_explain_contract(&service, chain_id, &address, &format).await?;
        }
        Commands::ExplainTransaction { address, hash } => {
            cmd_explain_transaction(&service, chain_id, &address, &hash, &format).await?;
        }
        Commands::PruneCache => {}
    }

    Ok(())
}
