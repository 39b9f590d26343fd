use crate::error::DiscoveryError;
use crate::known_contracts::{detect_interfaces, explanation_for_path};
use crate::models::{ContractDetails, SourceEntry};
use alloy::json_abi::JsonAbi;
use alloy_primitives::Address;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;
use tracing::{debug, info};

const IGNORED_SOURCE_PATHS: [&str; 3] = [
    "metadata.json",
    "creator-tx-hash.txt",
    "immutable-references",
];

const CONTRACT_NAME_PATTERN: &str =
    r"(?:contract|abstract\s+contract|interface|library)\s+(\w+)(?:\s+is\s+[^{]*)?\s*\{";

/// Resolves a deployed contract's ABI and, where published, its sources.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ContractDiscovery: Send + Sync {
    async fn get_contract(
        &self,
        chain_id: u64,
        address: Address,
    ) -> Result<ContractDetails, DiscoveryError>;
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    message: String,
    result: Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SourceCodeEntry {
    #[serde(default)]
    source_code: String,
    #[serde(rename = "ABI", default)]
    abi: String,
    #[serde(default)]
    contract_name: String,
    #[serde(default)]
    proxy: String,
    #[serde(default)]
    implementation: String,
}

impl SourceCodeEntry {
    fn implementation(&self) -> Option<Address> {
        if self.proxy != "1" {
            return None;
        }
        Address::from_str(&self.implementation).ok()
    }
}

/// Explorer-backed discovery using the `getsourcecode` endpoint.
#[derive(Debug, Clone)]
pub struct EtherscanDiscovery {
    http: reqwest::Client,
    api_url: String,
    api_key: String,
    supported_chains: Vec<u64>,
}

impl EtherscanDiscovery {
    pub fn new(api_url: String, api_key: String, supported_chains: Vec<u64>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_url,
            api_key,
            supported_chains,
        }
    }

    async fn fetch_source_entry(
        &self,
        chain_id: u64,
        address: Address,
    ) -> Result<SourceCodeEntry, DiscoveryError> {
        let response: ExplorerResponse = self
            .http
            .get(&self.api_url)
            .query(&[
                ("chainid", chain_id.to_string()),
                ("module", "contract".to_string()),
                ("action", "getsourcecode".to_string()),
                ("address", format!("{address:?}")),
                ("apikey", self.api_key.clone()),
            ])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DiscoveryError::DiscoveryFailed(e.to_string()))?
            .json()
            .await
            .map_err(|e| DiscoveryError::DiscoveryFailed(e.to_string()))?;

        parse_explorer_response(response)
    }
}

#[async_trait]
impl ContractDiscovery for EtherscanDiscovery {
    async fn get_contract(
        &self,
        chain_id: u64,
        address: Address,
    ) -> Result<ContractDetails, DiscoveryError> {
        if !self.supported_chains.contains(&chain_id) {
            return Err(DiscoveryError::ChainNotSupported(chain_id));
        }

        let mut entry = self.fetch_source_entry(chain_id, address).await?;

        if let Some(implementation) = entry.implementation() {
            info!(
                "Contract {:?} is a proxy, following implementation {:?}",
                address, implementation
            );
            entry = self.fetch_source_entry(chain_id, implementation).await?;
        }

        let details = contract_details_from_entry(&entry)?;
        debug!(
            "Retrieved contract details for {:?} on chain {}",
            address, chain_id
        );
        Ok(details)
    }
}

fn parse_explorer_response(response: ExplorerResponse) -> Result<SourceCodeEntry, DiscoveryError> {
    if response.status != "1" {
        let detail = response
            .result
            .as_str()
            .map(str::to_string)
            .unwrap_or(response.message);
        return Err(DiscoveryError::DiscoveryFailed(detail));
    }

    let entries: Vec<SourceCodeEntry> = serde_json::from_value(response.result)
        .map_err(|e| DiscoveryError::DiscoveryFailed(e.to_string()))?;

    entries
        .into_iter()
        .next()
        .ok_or_else(|| DiscoveryError::DiscoveryFailed("empty explorer result".to_string()))
}

fn contract_details_from_entry(entry: &SourceCodeEntry) -> Result<ContractDetails, DiscoveryError> {
    // Unverified contracts come back with a message in place of the ABI.
    if !entry.abi.trim_start().starts_with('[') {
        return Err(DiscoveryError::DiscoveryFailed(entry.abi.clone()));
    }

    let abi: JsonAbi =
        serde_json::from_str(&entry.abi).map_err(|e| DiscoveryError::InvalidAbi(e.to_string()))?;

    let files = split_source_files(&entry.source_code, &entry.contract_name);
    let mut sources = refine_sources(files);

    // Without sources, recognised interfaces are still worth telling the model about.
    if sources.is_empty() {
        sources = detect_interfaces(&abi)
            .into_iter()
            .map(|interface| SourceEntry::Known {
                name: interface.name.to_string(),
                explanation: interface.explanation.to_string(),
            })
            .collect();
    }

    let name = Some(entry.contract_name.clone()).filter(|n| !n.is_empty());

    Ok(ContractDetails {
        abi,
        name,
        sources: Some(sources),
    })
}

/// Splits an explorer `SourceCode` field into `(path, content)` pairs.
///
/// The field is either a single flattened file, a JSON object of files, or
/// a standard-JSON compiler input wrapped in an extra pair of braces.
fn split_source_files(source_code: &str, contract_name: &str) -> Vec<(String, String)> {
    let trimmed = source_code.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let parsed: Option<Value> = if trimmed.starts_with("{{") && trimmed.ends_with("}}") {
        serde_json::from_str(&trimmed[1..trimmed.len() - 1]).ok()
    } else if trimmed.starts_with('{') {
        serde_json::from_str(trimmed).ok()
    } else {
        None
    };

    let Some(parsed) = parsed else {
        return vec![(format!("{contract_name}.sol"), source_code.to_string())];
    };

    let files = parsed.get("sources").unwrap_or(&parsed);
    files
        .as_object()
        .map(|files| {
            files
                .iter()
                .filter_map(|(path, file)| {
                    let content = file.get("content")?.as_str()?;
                    Some((path.clone(), content.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn refine_sources(files: Vec<(String, String)>) -> Vec<SourceEntry> {
    files
        .into_iter()
        .filter(|(path, _)| !IGNORED_SOURCE_PATHS.iter().any(|p| path.contains(p)))
        .map(|(path, content)| match explanation_for_path(&path) {
            Some((name, explanation)) => SourceEntry::Known {
                name: name.to_string(),
                explanation: explanation.to_string(),
            },
            None => SourceEntry::Content {
                name: grab_contract_name(&content),
                content,
            },
        })
        .collect()
}

/// Name of the first contract, interface or library declared in `content`.
pub fn grab_contract_name(content: &str) -> String {
    Regex::new(CONTRACT_NAME_PATTERN)
        .ok()
        .and_then(|re| {
            re.captures(content)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
        })
        .unwrap_or_default()
}
