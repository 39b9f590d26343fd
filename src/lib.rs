pub mod aggregator;
pub mod bigint;
pub mod cache;
pub mod cache_keys;
pub mod cli;
pub mod codec;
pub mod config;
pub mod discovery;
pub mod error;
pub mod known_contracts;
pub mod llm;
pub mod models;
pub mod prompts;
pub mod rpc;
pub mod service;
pub mod sessions;
pub mod stream;
