use crate::aggregator::TransactionAggregator;
use crate::cache::Cache;
use crate::cache_keys::{
    contract_details_key, explain_contract_key, transaction_details_key,
    transaction_explanation_key,
};
use crate::codec::ContractAbi;
use crate::discovery::ContractDiscovery;
use crate::error::{ExplainError, Result};
use crate::llm::{GenerationRequest, LanguageModel};
use crate::models::{
    ContractDetails, ContractInput, ExplainContractOutput, ExplainTransactionOutput,
    TransactionDetails, TransactionInput, TransactionsInput,
};
use crate::prompts::{explain_contract_request, explain_transaction_request};
use crate::rpc::ChainClient;
use crate::sessions::{SessionKey, SessionRegistry};
use crate::stream::{
    CancelHandle, StreamCallbacks, StreamOutcome, fail, run_stream, spawn_stream,
};
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A running (or refused) explanation subscription.
///
/// A subscription is idle when another one with the same identity was
/// already in flight: it never starts a generation and its callbacks never
/// fire.
#[derive(Debug)]
pub struct Subscription {
    cancel: Option<CancelHandle>,
    task: Option<JoinHandle<StreamOutcome>>,
}

impl Subscription {
    fn idle() -> Self {
        Self {
            cancel: None,
            task: None,
        }
    }

    fn active(cancel: CancelHandle, task: JoinHandle<StreamOutcome>) -> Self {
        Self {
            cancel: Some(cancel),
            task: Some(task),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.task.is_none()
    }

    /// Stops the generation and silences its callbacks. Safe to call any
    /// number of times, on idle subscriptions too.
    pub fn cancel(&self) {
        if let Some(cancel) = &self.cancel {
            cancel.cancel();
        }
    }

    /// Waits for the subscription to reach a terminal state. `None` for idle
    /// subscriptions.
    pub async fn finished(self) -> Option<StreamOutcome> {
        match self.task {
            Some(task) => task.await.ok(),
            None => None,
        }
    }
}

/// Cache-first access to contract details, transactions and their
/// explanations.
#[derive(Clone)]
pub struct ExplainerService {
    chains: Arc<HashMap<u64, TransactionAggregator>>,
    discovery: Arc<dyn ContractDiscovery>,
    llm: Arc<dyn LanguageModel>,
    cache: Cache,
    sessions: SessionRegistry,
}

impl ExplainerService {
    pub fn new(
        chains: HashMap<u64, Arc<dyn ChainClient>>,
        discovery: Arc<dyn ContractDiscovery>,
        llm: Arc<dyn LanguageModel>,
        cache: Cache,
    ) -> Self {
        let chains = chains
            .into_iter()
            .map(|(chain_id, client)| (chain_id, TransactionAggregator::new(client)))
            .collect();

        Self {
            chains: Arc::new(chains),
            discovery,
            llm,
            cache,
            sessions: SessionRegistry::new(),
        }
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    fn aggregator(&self, chain_id: u64) -> Result<&TransactionAggregator> {
        self.chains
            .get(&chain_id)
            .ok_or(ExplainError::ChainNotSupported(chain_id))
    }

    /// Writes through to the cache. A failed write is logged and otherwise
    /// ignored; the caller already holds the value.
    async fn store<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(e) = self.cache.set(key, value).await {
            error!("Failed to cache {}: {}", key, e);
        }
    }

    fn persist_to<T>(
        &self,
        key: String,
    ) -> impl FnOnce(&T) -> BoxFuture<'static, ()> + Send + 'static
    where
        T: Serialize + 'static,
    {
        let service = self.clone();
        move |value: &T| {
            let value = serde_json::to_value(value);
            async move {
                match value {
                    Ok(value) => service.store(&key, &value).await,
                    Err(e) => error!("Failed to serialize {} for caching: {}", key, e),
                }
            }
            .boxed()
        }
    }

    pub async fn get_contract_details(&self, input: &ContractInput) -> Result<ContractDetails> {
        let key = contract_details_key(input);
        if let Some(cached) = self.cache.get::<ContractDetails>(&key).await {
            return Ok(cached);
        }

        let details = self
            .discovery
            .get_contract(input.chain_id, input.contract_address)
            .await?;
        self.store(&key, &details).await;
        Ok(details)
    }

    /// Transactions that touched the contract in the requested window, each
    /// also cached individually.
    pub async fn get_transactions(
        &self,
        input: &TransactionsInput,
    ) -> Result<Vec<TransactionDetails>> {
        let aggregator = self.aggregator(input.chain_id)?;
        let details = self.get_contract_details(&input.contract()).await?;
        let abi = ContractAbi::from(&details.abi);

        let transactions = aggregator
            .get_transactions_by_range(
                input.contract_address,
                input.from_block,
                input.to_block,
                &abi,
            )
            .await?;

        join_all(transactions.iter().map(|tx| {
            let key = transaction_details_key(&tx.hash);
            async move { self.store(&key, tx).await }
        }))
        .await;

        Ok(transactions)
    }

    pub async fn get_transaction(&self, input: &TransactionInput) -> Result<TransactionDetails> {
        let aggregator = self.aggregator(input.chain_id)?;
        let key = transaction_details_key(&input.transaction_hash);
        if let Some(cached) = self.cache.get::<TransactionDetails>(&key).await {
            return Ok(cached);
        }

        let details = self.get_contract_details(&input.contract()).await?;
        let abi = ContractAbi::from(&details.abi);
        let transaction = aggregator
            .get_transaction_by_hash(input.transaction_hash, &abi)
            .await?;

        self.store(&key, &transaction).await;
        Ok(transaction)
    }

    pub async fn explain_contract_from_cache(
        &self,
        input: &ContractInput,
    ) -> Option<ExplainContractOutput> {
        self.cache.get(&explain_contract_key(input)).await
    }

    /// Cached explanation if there is one, otherwise a fresh (non-streamed)
    /// generation that is cached before being returned.
    pub async fn explain_contract(
        &self,
        input: &ContractInput,
        details: &ContractDetails,
    ) -> Result<ExplainContractOutput> {
        let key = explain_contract_key(input);
        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        info!("Generating explanation for {:?}", input.contract_address);
        let value = self.llm.generate(explain_contract_request(details)?).await?;
        let output: ExplainContractOutput = serde_json::from_value(value)
            .map_err(|e| ExplainError::InvalidOutput(e.to_string()))?;

        self.store(&key, &output).await;
        Ok(output)
    }

    /// Streams a contract explanation. The result is cached before
    /// `on_complete` runs.
    pub fn explain_contract_stream(
        &self,
        input: &ContractInput,
        details: &ContractDetails,
        callbacks: Box<dyn StreamCallbacks<ExplainContractOutput>>,
    ) -> CancelHandle {
        let request = match explain_contract_request(details) {
            Ok(request) => request,
            Err(e) => return fail_now(callbacks, e),
        };

        let stream = self.llm.stream(request);
        let (handle, _) = spawn_stream(
            stream,
            callbacks,
            self.persist_to::<ExplainContractOutput>(explain_contract_key(input)),
        );
        handle
    }

    /// Streams a transaction explanation. Fails through `on_error` with
    /// [`ExplainError::EventNotFound`] when the transaction emitted an event
    /// the contract explanation does not cover.
    pub fn explain_transaction_stream(
        &self,
        details: &TransactionDetails,
        contract_explanation: &ExplainContractOutput,
        callbacks: Box<dyn StreamCallbacks<ExplainTransactionOutput>>,
    ) -> CancelHandle {
        let request = match explain_transaction_request(details, contract_explanation) {
            Ok(request) => request,
            Err(e) => return fail_now(callbacks, e),
        };

        let stream = self.llm.stream(request);
        let (handle, _) = spawn_stream(
            stream,
            callbacks,
            self.persist_to::<ExplainTransactionOutput>(transaction_explanation_key(&details.hash)),
        );
        handle
    }

    /// Explains a contract for a session, at most once at a time per session.
    pub fn subscribe_contract_explanation(
        &self,
        session_id: &str,
        input: ContractInput,
        callbacks: Box<dyn StreamCallbacks<ExplainContractOutput>>,
    ) -> Subscription {
        let cancel = CancelHandle::new();
        let Some(guard) = self
            .sessions
            .try_register(SessionKey::contract(session_id), cancel.clone())
        else {
            debug!("Session {} already has a contract explanation in flight", session_id);
            return Subscription::idle();
        };

        let service = self.clone();
        let token = cancel.token();
        let task = tokio::spawn(async move {
            let _guard = guard;
            service.contract_explanation(input, callbacks, token).await
        });
        Subscription::active(cancel, task)
    }

    /// Explains a transaction for a session, at most once at a time per
    /// session and transaction.
    pub fn subscribe_transaction_explanation(
        &self,
        session_id: &str,
        input: TransactionInput,
        callbacks: Box<dyn StreamCallbacks<ExplainTransactionOutput>>,
    ) -> Subscription {
        let cancel = CancelHandle::new();
        let Some(guard) = self.sessions.try_register(
            SessionKey::transaction(session_id, input.transaction_hash),
            cancel.clone(),
        ) else {
            debug!(
                "Session {} already has an explanation of {:?} in flight",
                session_id, input.transaction_hash
            );
            return Subscription::idle();
        };

        let service = self.clone();
        let token = cancel.token();
        let task = tokio::spawn(async move {
            let _guard = guard;
            service.transaction_explanation(input, callbacks, token).await
        });
        Subscription::active(cancel, task)
    }

    async fn contract_explanation(
        &self,
        input: ContractInput,
        callbacks: Box<dyn StreamCallbacks<ExplainContractOutput>>,
        cancel: CancellationToken,
    ) -> StreamOutcome {
        let key = explain_contract_key(&input);
        if let Some(cached) = self.cache.get(&key).await {
            return complete_from_cache(callbacks, &cancel, cached);
        }

        let request = match cancel
            .run_until_cancelled(self.contract_request(&input))
            .await
        {
            None => return StreamOutcome::Cancelled,
            Some(Err(e)) => return fail(callbacks, &cancel, e),
            Some(Ok(request)) => request,
        };

        let stream = self.llm.stream(request);
        run_stream(
            stream,
            callbacks,
            cancel,
            self.persist_to::<ExplainContractOutput>(key),
        )
        .await
    }

    async fn contract_request(&self, input: &ContractInput) -> Result<GenerationRequest> {
        let details = self.get_contract_details(input).await?;
        explain_contract_request(&details)
    }

    async fn transaction_explanation(
        &self,
        input: TransactionInput,
        callbacks: Box<dyn StreamCallbacks<ExplainTransactionOutput>>,
        cancel: CancellationToken,
    ) -> StreamOutcome {
        let key = transaction_explanation_key(&input.transaction_hash);
        if let Some(cached) = self.cache.get(&key).await {
            return complete_from_cache(callbacks, &cancel, cached);
        }

        let request = match cancel
            .run_until_cancelled(self.transaction_request(&input))
            .await
        {
            None => return StreamOutcome::Cancelled,
            Some(Err(e)) => return fail(callbacks, &cancel, e),
            Some(Ok(request)) => request,
        };

        let stream = self.llm.stream(request);
        run_stream(
            stream,
            callbacks,
            cancel,
            self.persist_to::<ExplainTransactionOutput>(key),
        )
        .await
    }

    async fn transaction_request(
        &self,
        input: &TransactionInput,
    ) -> Result<GenerationRequest> {
        let transaction = self.get_transaction(input).await?;
        let contract = input.contract();
        let details = self.get_contract_details(&contract).await?;
        let explanation = self.explain_contract(&contract, &details).await?;
        explain_transaction_request(&transaction, &explanation)
    }
}

fn complete_from_cache<T: 'static>(
    callbacks: Box<dyn StreamCallbacks<T>>,
    cancel: &CancellationToken,
    cached: T,
) -> StreamOutcome {
    if cancel.is_cancelled() {
        return StreamOutcome::Cancelled;
    }
    callbacks.on_complete(cached);
    StreamOutcome::Completed
}

fn fail_now<T: 'static>(
    callbacks: Box<dyn StreamCallbacks<T>>,
    error: ExplainError,
) -> CancelHandle {
    let handle = CancelHandle::new();
    fail(callbacks, &handle.token(), error);
    handle
}
