use crate::codec::{ContractAbi, decode_function_call, decode_log};
use crate::error::{ChainError, ExplainError};
use crate::models::{ChainTransaction, RawLogEntry, RawTransactionRecord, TransactionDetails};
use crate::rpc::ChainClient;
use alloy_primitives::{Address, B256};
use futures::future::try_join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Widest window a single log query may cover, and the default lookback.
pub const MAX_BLOCK_RANGE: u64 = 10_000;

/// Turns a contract's on-chain activity into decoded [`TransactionDetails`].
#[derive(Clone)]
pub struct TransactionAggregator {
    client: Arc<dyn ChainClient>,
}

impl TransactionAggregator {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }

    /// Inclusive block window to scan. Missing bounds default to the most
    /// recent [`MAX_BLOCK_RANGE`] blocks.
    pub async fn resolve_block_range(
        &self,
        from_block: Option<u64>,
        to_block: Option<u64>,
    ) -> Result<(u64, u64), ExplainError> {
        let to = match to_block {
            Some(to) => to,
            None => self.client.latest_block().await?,
        };
        let from = from_block.unwrap_or_else(|| to.saturating_sub(MAX_BLOCK_RANGE - 1));

        if from > to {
            return Err(ExplainError::InvalidRange {
                from,
                to,
                reason: "start block is after end block".to_string(),
            });
        }
        if to - from >= MAX_BLOCK_RANGE {
            return Err(ExplainError::InvalidRange {
                from,
                to,
                reason: format!("window exceeds {MAX_BLOCK_RANGE} blocks"),
            });
        }

        Ok((from, to))
    }

    /// Every transaction that emitted a log from `contract` in the window, in
    /// the order the logs first mention them.
    ///
    /// Transactions are fetched concurrently. Any single fetch failure fails
    /// the whole batch.
    pub async fn get_transactions_by_range(
        &self,
        contract: Address,
        from_block: Option<u64>,
        to_block: Option<u64>,
        abi: &ContractAbi,
    ) -> Result<Vec<TransactionDetails>, ExplainError> {
        let (from, to) = self.resolve_block_range(from_block, to_block).await?;

        let logs = self.client.get_logs(contract, from, to).await?;
        let records = group_logs_by_transaction(logs);
        info!(
            "Found {} transactions for {:?} in blocks {} to {}",
            records.len(),
            contract,
            from,
            to
        );

        let details = try_join_all(
            records
                .into_iter()
                .map(|record| self.assemble_record(record, abi)),
        )
        .await?;

        Ok(details)
    }

    /// A single transaction with its receipt logs, without scanning a range.
    pub async fn get_transaction_by_hash(
        &self,
        hash: B256,
        abi: &ContractAbi,
    ) -> Result<TransactionDetails, ChainError> {
        let (transaction, logs) = futures::try_join!(
            self.client.get_transaction(hash),
            self.client.get_receipt_logs(hash)
        )?;

        Ok(build_transaction_details(abi, &transaction, &logs))
    }

    async fn assemble_record(
        &self,
        record: RawTransactionRecord,
        abi: &ContractAbi,
    ) -> Result<TransactionDetails, ChainError> {
        let transaction = self.client.get_transaction(record.hash).await?;
        Ok(build_transaction_details(abi, &transaction, &record.logs))
    }
}

/// Groups logs by transaction hash. Transactions keep first-seen order and
/// each keeps its logs in the order they arrived.
pub fn group_logs_by_transaction(logs: Vec<RawLogEntry>) -> Vec<RawTransactionRecord> {
    let mut records: Vec<RawTransactionRecord> = Vec::new();
    let mut positions: HashMap<B256, usize> = HashMap::new();

    for log in logs {
        match positions.get(&log.transaction_hash) {
            Some(&position) => records[position].logs.push(log),
            None => {
                positions.insert(log.transaction_hash, records.len());
                records.push(RawTransactionRecord {
                    hash: log.transaction_hash,
                    logs: vec![log],
                });
            }
        }
    }

    records
}

/// Decodes a fetched transaction and its logs into the canonical record.
pub fn build_transaction_details(
    abi: &ContractAbi,
    transaction: &ChainTransaction,
    logs: &[RawLogEntry],
) -> TransactionDetails {
    let call = decode_function_call(abi, &transaction.input, transaction.to);
    if call.is_fallback() {
        debug!("Could not decode calldata of {:?}", transaction.hash);
    }

    // Pending transactions carry no block; fall back to where the logs were seen.
    let block_number = transaction
        .block_number
        .or_else(|| logs.first().and_then(|log| log.block_number))
        .map(|b| b.to_string())
        .unwrap_or_default();

    let logs = logs
        .iter()
        .map(|log| {
            let decoded = decode_log(abi, &log.topics, &log.data);
            if decoded.is_fallback() {
                debug!(
                    "Could not decode log {} of {:?}",
                    log.log_index, transaction.hash
                );
            }
            decoded.into_inner()
        })
        .collect();

    TransactionDetails {
        hash: transaction.hash,
        block_number,
        from: transaction.from,
        to: transaction.to,
        value: transaction.value.to_string(),
        call: call.into_inner(),
        logs,
    }
}
