use alloy_primitives::B256;
use thiserror::Error;

/// Failures talking to a chain node.
#[derive(Error, Debug, Clone)]
pub enum ChainError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Request timeout after {0} seconds")]
    Timeout(u64),

    #[error("Transaction not found: {0:?}")]
    TransactionNotFound(B256),

    #[error("Receipt not found for transaction: {0:?}")]
    ReceiptNotFound(B256),

    #[error("Log is missing {0}")]
    IncompleteLog(&'static str),
}

/// Failures resolving a contract's ABI and sources.
#[derive(Error, Debug, Clone)]
pub enum DiscoveryError {
    #[error("Chain not supported: {0}")]
    ChainNotSupported(u64),

    #[error("Contract discovery failed: {0}")]
    DiscoveryFailed(String),

    #[error("Invalid ABI: {0}")]
    InvalidAbi(String),
}

/// Failures from the language model provider.
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("LLM transport error: {0}")]
    Transport(String),

    #[error("LLM API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("LLM returned an invalid response: {0}")]
    InvalidResponse(String),

    #[error("Generation stream ended without a result")]
    Interrupted,

    #[error("Failed to build prompt: {0}")]
    Prompt(String),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Transport(err.to_string())
    }
}

/// Failures from the cache store.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Cache database error: {0}")]
    Database(String),

    #[error("Cache serialization error: {0}")]
    Serialization(String),

    #[error("Cache task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

/// Errors surfaced by the explainer service to its callers.
#[derive(Error, Debug, Clone)]
pub enum ExplainError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Generation(#[from] LlmError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Chain not supported: {0}")]
    ChainNotSupported(u64),

    #[error("Invalid block range {from}-{to}: {reason}")]
    InvalidRange { from: u64, to: u64, reason: String },

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Generated output does not match the expected schema: {0}")]
    InvalidOutput(String),
}

pub type Result<T, E = ExplainError> = std::result::Result<T, E>;
