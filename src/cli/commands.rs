use crate::cache::SqliteCacheStore;
use crate::cli::formatters::{
    OutputFormat, format_contract_details, format_contract_explanation, format_progress,
    format_transaction, format_transaction_explanation, format_transactions,
};
use crate::error::ExplainError;
use crate::models::{
    ContractInput, ExplainContractOutput, ExplainTransactionOutput, TransactionInput,
    TransactionsInput,
};
use crate::service::ExplainerService;
use crate::stream::{CancelHandle, StreamCallbacks};
use alloy_primitives::{Address, B256};
use anyhow::Result;
use serde_json::Value;
use std::str::FromStr;
use tokio::sync::oneshot;
use tracing::info;

pub fn parse_address(address: &str) -> Result<Address> {
    Address::from_str(address).map_err(|_| anyhow::anyhow!("Invalid address format: {}", address))
}

pub fn parse_hash(hash: &str) -> Result<B256> {
    B256::from_str(hash).map_err(|_| anyhow::anyhow!("Invalid transaction hash: {}", hash))
}

pub struct TransactionsQuery {
    pub chain_id: u64,
    pub address: String,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

pub async fn cmd_transactions(
    service: &ExplainerService,
    query: TransactionsQuery,
    format: &OutputFormat,
) -> Result<()> {
    let input = TransactionsInput {
        chain_id: query.chain_id,
        contract_address: parse_address(&query.address)?,
        from_block: query.from_block,
        to_block: query.to_block,
    };

    let transactions = service.get_transactions(&input).await?;
    println!("{}", format_transactions(&transactions, format));

    Ok(())
}

pub async fn cmd_transaction(
    service: &ExplainerService,
    chain_id: u64,
    address: &str,
    hash: &str,
    format: &OutputFormat,
) -> Result<()> {
    let input = TransactionInput {
        chain_id,
        contract_address: parse_address(address)?,
        transaction_hash: parse_hash(hash)?,
    };

    let transaction = service.get_transaction(&input).await?;
    println!("{}", format_transaction(&transaction, format));

    Ok(())
}

pub async fn cmd_contract(
    service: &ExplainerService,
    chain_id: u64,
    address: &str,
    format: &OutputFormat,
) -> Result<()> {
    let input = ContractInput {
        chain_id,
        contract_address: parse_address(address)?,
    };

    let details = service.get_contract_details(&input).await?;
    println!("{}", format_contract_details(&details, format));

    Ok(())
}

/// Reports progress on stderr and hands the terminal result to a oneshot
/// channel.
struct Reporter<T> {
    done: oneshot::Sender<Result<T, ExplainError>>,
}

impl<T: Send + 'static> StreamCallbacks<T> for Reporter<T> {
    fn on_progress(&mut self, partial: &Value) {
        eprintln!("{}", format_progress(partial));
    }

    fn on_complete(self: Box<Self>, value: T) {
        let _ = self.done.send(Ok(value));
    }

    fn on_error(self: Box<Self>, error: ExplainError) {
        let _ = self.done.send(Err(error));
    }
}

fn reporter<T>() -> (Box<Reporter<T>>, oneshot::Receiver<Result<T, ExplainError>>) {
    let (done, rx) = oneshot::channel();
    (Box::new(Reporter { done }), rx)
}

/// Waits for the stream to finish; Ctrl-C cancels the generation.
async fn wait_for<T>(
    handle: CancelHandle,
    done: oneshot::Receiver<Result<T, ExplainError>>,
) -> Result<Option<T>> {
    tokio::select! {
        result = done => match result {
            Ok(result) => Ok(Some(result?)),
            // Callbacks dropped without a terminal call: the stream was cancelled.
            Err(_) => Ok(None),
        },
        _ = tokio::signal::ctrl_c() => {
            handle.cancel();
            info!("Generation cancelled");
            Ok(None)
        }
    }
}

pub async fn cmd_explain_contract(
    service: &ExplainerService,
    chain_id: u64,
    address: &str,
    format: &OutputFormat,
) -> Result<()> {
    let input = ContractInput {
        chain_id,
        contract_address: parse_address(address)?,
    };

    if let Some(cached) = service.explain_contract_from_cache(&input).await {
        println!("{}", format_contract_explanation(&cached, format));
        return Ok(());
    }

    let details = service.get_contract_details(&input).await?;
    let (callbacks, rx) = reporter::<ExplainContractOutput>();
    let handle = service.explain_contract_stream(&input, &details, callbacks);

    if let Some(output) = wait_for(handle, rx).await? {
        println!("{}", format_contract_explanation(&output, format));
    }

    Ok(())
}

pub async fn cmd_explain_transaction(
    service: &ExplainerService,
    chain_id: u64,
    address: &str,
    hash: &str,
    format: &OutputFormat,
) -> Result<()> {
    let input = TransactionInput {
        chain_id,
        contract_address: parse_address(address)?,
        transaction_hash: parse_hash(hash)?,
    };

    let transaction = service.get_transaction(&input).await?;
    let contract = input.contract();
    let details = service.get_contract_details(&contract).await?;

    info!("Explaining contract {:?} first", contract.contract_address);
    let contract_explanation = service.explain_contract(&contract, &details).await?;

    let (callbacks, rx) = reporter::<ExplainTransactionOutput>();
    let handle = service.explain_transaction_stream(&transaction, &contract_explanation, callbacks);

    if let Some(output) = wait_for(handle, rx).await? {
        println!("{}", format_transaction_explanation(&output, format));
    }

    Ok(())
}

pub async fn cmd_prune_cache(store: &SqliteCacheStore) -> Result<()> {
    let removed = store.prune_expired().await?;
    println!("Removed {removed} expired cache entries");

    Ok(())
}
