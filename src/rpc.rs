use crate::error::ChainError;
use crate::models::{ChainTransaction, RawLogEntry};
use alloy::consensus::Transaction as _;
use alloy::network::TransactionResponse as _;
use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log, Transaction};
use alloy::transports::TransportError;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use regex::Regex;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};

type AlloyFullProvider = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider,
>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120); // 2 minutes timeout per request
const MAX_RESULTS_ERROR: &str = "exceeds max results";

/// Read access to a chain node, as much as transaction decoding needs.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn latest_block(&self) -> Result<u64, ChainError>;

    /// All logs emitted by `address` in `[from_block, to_block]`.
    async fn get_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLogEntry>, ChainError>;

    async fn get_transaction(&self, hash: B256) -> Result<ChainTransaction, ChainError>;

    /// Logs from the transaction's receipt, in emission order.
    async fn get_receipt_logs(&self, hash: B256) -> Result<Vec<RawLogEntry>, ChainError>;
}

impl TryFrom<&Log> for RawLogEntry {
    type Error = ChainError;

    fn try_from(log: &Log) -> Result<Self, Self::Error> {
        Ok(RawLogEntry {
            address: log.address(),
            transaction_hash: log
                .transaction_hash
                .ok_or(ChainError::IncompleteLog("transaction hash"))?,
            log_index: log.log_index.ok_or(ChainError::IncompleteLog("log index"))?,
            topics: log.topics().to_vec(),
            data: log.data().data.clone(),
            block_number: log.block_number,
        })
    }
}

impl From<&Transaction> for ChainTransaction {
    fn from(tx: &Transaction) -> Self {
        ChainTransaction {
            hash: tx.tx_hash(),
            input: tx.input().clone(),
            from: tx.from(),
            to: tx.to(),
            value: tx.value(),
            block_number: tx.block_number,
        }
    }
}

fn convert_logs(logs: &[Log]) -> Result<Vec<RawLogEntry>, ChainError> {
    logs.iter().map(RawLogEntry::try_from).collect()
}

#[derive(Clone)]
pub struct RpcClient {
    providers: Vec<AlloyFullProvider>,
    urls: Vec<String>,
    current_provider: Arc<AtomicUsize>,
    max_retries: usize,
}

impl RpcClient {
    pub fn new(rpc_urls: &[String]) -> anyhow::Result<Self> {
        if rpc_urls.is_empty() {
            return Err(anyhow::anyhow!("At least one RPC URL must be provided"));
        }

        let mut providers = Vec::new();
        for url in rpc_urls {
            let parsed_url = url
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", url))?;
            let provider: AlloyFullProvider = ProviderBuilder::new().connect_http(parsed_url);
            providers.push(provider);
        }

        Ok(RpcClient {
            providers,
            urls: rpc_urls.to_vec(),
            current_provider: Arc::new(AtomicUsize::new(0)),
            max_retries: 5,
        })
    }

    fn get_provider(&self) -> &AlloyFullProvider {
        let index = self.current_provider.load(Ordering::Relaxed) % self.providers.len();
        &self.providers[index]
    }

    pub fn get_current_url(&self) -> &str {
        let index = self.current_provider.load(Ordering::Relaxed) % self.urls.len();
        &self.urls[index]
    }

    pub fn rotate_provider(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);

        if self.providers.len() > 1 {
            debug!("Rotating to RPC provider #{}", next);
        }
    }

    fn get_retry_strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries)
    }

    fn handle_error(&self, error_str: &str) {
        let current_url = self.get_current_url();
        warn!(
            "RPC error on {}: {}, rotating provider",
            current_url, error_str
        );
        self.rotate_provider();
    }

    fn handle_timeout(&self) -> ChainError {
        let current_url = self.get_current_url();
        warn!(
            "Request timeout after {} seconds on {}, rotating provider",
            REQUEST_TIMEOUT.as_secs(),
            current_url
        );
        self.rotate_provider();
        ChainError::Timeout(REQUEST_TIMEOUT.as_secs())
    }

    /// Runs one provider call with timeout, rotation and backoff.
    async fn request<T, F, Fut>(&self, call: F) -> Result<T, ChainError>
    where
        F: Fn(AlloyFullProvider) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        Retry::spawn(self.get_retry_strategy(), || {
            let future = call(self.get_provider().clone());
            async move {
                match timeout(REQUEST_TIMEOUT, future).await {
                    Ok(Ok(result)) => Ok(result),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();
                        self.handle_error(&error_str);
                        Err(ChainError::Rpc(error_str))
                    }
                    Err(_) => Err(self.handle_timeout()),
                }
            }
        })
        .await
    }

    async fn get_logs_internal(
        &self,
        from_block: u64,
        to_block: u64,
        contract_address: Address,
    ) -> Result<Vec<Log>, ChainError> {
        Retry::spawn(self.get_retry_strategy(), || async move {
            let provider = self.get_provider();
            let filter = Filter::new()
                .address(contract_address)
                .from_block(from_block)
                .to_block(to_block);

            match timeout(REQUEST_TIMEOUT, provider.get_logs(&filter)).await {
                Ok(Ok(logs)) => Ok(Ok(logs)),
                Ok(Err(e)) => {
                    let error_str = e.to_string();

                    if error_str.contains(MAX_RESULTS_ERROR) {
                        debug!(
                            "Max results exceeded for blocks {}-{}, will split range",
                            from_block, to_block
                        );
                        // not retried: the caller splits the range instead
                        Ok(Err(ChainError::Rpc(error_str)))
                    } else {
                        self.handle_error(&error_str);
                        Err(ChainError::Rpc(error_str))
                    }
                }
                Err(_) => Err(self.handle_timeout()),
            }
        })
        .await
        .and_then(|r| r)
    }

    fn parse_max_results_error(error_str: &str) -> Option<(u64, u64)> {
        let re = Regex::new(r"retry with the range (\d+)-(\d+)").ok()?;
        let captures = re.captures(error_str)?;

        let from = captures.get(1)?.as_str().parse().ok()?;
        let to = captures.get(2)?.as_str().parse().ok()?;

        Some((from, to))
    }

    async fn fetch_logs(
        &self,
        from_block: u64,
        to_block: u64,
        contract_address: Address,
    ) -> Result<Vec<Log>, ChainError> {
        let mut all_logs = Vec::new();
        let mut current_from = from_block;

        while current_from <= to_block {
            match self
                .get_logs_internal(current_from, to_block, contract_address)
                .await
            {
                Ok(logs) => {
                    all_logs.extend(logs);
                    break;
                }
                Err(ChainError::Rpc(error_str)) if error_str.contains(MAX_RESULTS_ERROR) => {
                    let Some((suggested_from, suggested_to)) =
                        Self::parse_max_results_error(&error_str)
                    else {
                        return Err(ChainError::Rpc(error_str));
                    };

                    info!(
                        "Hit max results limit for blocks {}-{}, splitting at block {}",
                        current_from, to_block, suggested_to
                    );

                    let logs = self
                        .get_logs_internal(suggested_from, suggested_to, contract_address)
                        .await?;

                    all_logs.extend(logs);
                    current_from = suggested_to + 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(all_logs)
    }
}

#[async_trait]
impl ChainClient for RpcClient {
    async fn latest_block(&self) -> Result<u64, ChainError> {
        self.request(|provider| async move { provider.get_block_number().await })
            .await
    }

    async fn get_logs(
        &self,
        address: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<RawLogEntry>, ChainError> {
        let logs = self.fetch_logs(from_block, to_block, address).await?;
        convert_logs(&logs)
    }

    async fn get_transaction(&self, hash: B256) -> Result<ChainTransaction, ChainError> {
        let tx = self
            .request(|provider| async move { provider.get_transaction_by_hash(hash).await })
            .await?
            .ok_or(ChainError::TransactionNotFound(hash))?;
        Ok(ChainTransaction::from(&tx))
    }

    async fn get_receipt_logs(&self, hash: B256) -> Result<Vec<RawLogEntry>, ChainError> {
        let receipt = self
            .request(|provider| async move { provider.get_transaction_receipt(hash).await })
            .await?
            .ok_or(ChainError::ReceiptNotFound(hash))?;
        convert_logs(receipt.inner.logs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{LogData, address, b256, bytes};

    #[test]
    fn test_parse_max_results_error() {
        let error = "query exceeds max results 10000, retry with the range 100-250";
        assert_eq!(RpcClient::parse_max_results_error(error), Some((100, 250)));
        assert_eq!(RpcClient::parse_max_results_error("query timeout"), None);
    }

    #[test]
    fn test_new_rejects_empty_url_list() {
        assert!(RpcClient::new(&[]).is_err());
        assert!(RpcClient::new(&["not a url".to_string()]).is_err());
    }

    #[test]
    fn test_rotation_wraps_around() {
        let client = RpcClient::new(&[
            "http://localhost:8545".to_string(),
            "http://localhost:8546".to_string(),
        ])
        .unwrap();

        assert_eq!(client.get_current_url(), "http://localhost:8545");
        client.rotate_provider();
        assert_eq!(client.get_current_url(), "http://localhost:8546");
        client.rotate_provider();
        assert_eq!(client.get_current_url(), "http://localhost:8545");
    }

    #[test]
    fn test_log_conversion_requires_identifiers() {
        let inner = alloy::primitives::Log {
            address: address!("0x00000000000000000000000000000000000000aa"),
            data: LogData::new_unchecked(
                vec![b256!("0x1111111111111111111111111111111111111111111111111111111111111111")],
                bytes!("0x01"),
            ),
        };
        let hash = b256!("0x2222222222222222222222222222222222222222222222222222222222222222");

        let complete = Log {
            inner: inner.clone(),
            transaction_hash: Some(hash),
            log_index: Some(3),
            block_number: Some(10),
            ..Default::default()
        };
        let entry = RawLogEntry::try_from(&complete).unwrap();
        assert_eq!(entry.transaction_hash, hash);
        assert_eq!(entry.log_index, 3);
        assert_eq!(entry.topics.len(), 1);
        assert_eq!(entry.data, bytes!("0x01"));

        let pending = Log {
            inner,
            ..Default::default()
        };
        assert!(matches!(
            RawLogEntry::try_from(&pending),
            Err(ChainError::IncompleteLog("transaction hash"))
        ));
    }
}
