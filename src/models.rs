use alloy::json_abi::JsonAbi;
use alloy_primitives::{Address, B256, Bytes, U256};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Decoded arguments keyed by parameter name, or by position when the ABI
/// leaves the parameter unnamed.
pub type DecodedArgs = Map<String, Value>;

/// One event occurrence as returned by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLogEntry {
    pub address: Address,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: Option<u64>,
}

/// A transaction hash and its logs, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransactionRecord {
    pub hash: B256,
    pub logs: Vec<RawLogEntry>,
}

/// The subset of a node transaction the aggregator needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: B256,
    pub input: Bytes,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    pub value: U256,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedFunctionCall {
    pub function_name: String,
    pub data: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<DecodedArgs>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedLogEntry {
    pub event_name: String,
    pub data: Bytes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<DecodedArgs>,
}

/// The canonical, cacheable view of one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionDetails {
    pub hash: B256,
    /// Decimal string, so consumers without 64-bit integers keep precision.
    pub block_number: String,
    pub from: Address,
    pub to: Option<Address>,
    /// Wei, decimal string.
    pub value: String,
    pub call: DecodedFunctionCall,
    pub logs: Vec<DecodedLogEntry>,
}

/// A contract source file, or a stand-in explanation for a well-known
/// library the model does not need to read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceEntry {
    Content { name: String, content: String },
    Known { name: String, explanation: String },
}

impl SourceEntry {
    pub fn name(&self) -> &str {
        match self {
            SourceEntry::Content { name, .. } | SourceEntry::Known { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractDetails {
    pub abi: JsonAbi,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<SourceEntry>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractInput {
    pub chain_id: u64,
    pub contract_address: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionsInput {
    pub chain_id: u64,
    pub contract_address: Address,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInput {
    pub chain_id: u64,
    pub contract_address: Address,
    pub transaction_hash: B256,
}

impl TransactionsInput {
    pub fn contract(&self) -> ContractInput {
        ContractInput {
            chain_id: self.chain_id,
            contract_address: self.contract_address,
        }
    }
}

impl TransactionInput {
    pub fn contract(&self) -> ContractInput {
        ContractInput {
            chain_id: self.chain_id,
            contract_address: self.contract_address,
        }
    }
}

/* ----------------------------- LLM outputs ----------------------------- */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainContractOutput {
    pub overview: String,
    pub functions: Vec<FunctionExplanation>,
    pub events: Vec<EventExplanation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    External,
    Internal,
    Private,
    Pure,
    View,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionExplanation {
    pub signature: String,
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParameterExplanation>,
    pub returns: Vec<ReturnExplanation>,
    pub visibility: Vec<Visibility>,
    pub payable: bool,
    pub modifiers: Vec<String>,
    pub side_effects: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterExplanation {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnExplanation {
    #[serde(rename = "type")]
    pub ty: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventExplanation {
    pub signature: String,
    pub name: String,
    pub description: String,
    pub parameters: Vec<EventParameterExplanation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventParameterExplanation {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub indexed: bool,
    pub description: String,
    pub significance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainTransactionOutput {
    pub summary: String,
    pub details: TransactionExplanationDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionExplanationDetails {
    pub function_call: FunctionCallAnalysis,
    pub emitted_events: Vec<EmittedEventAnalysis>,
    pub state_changes: Vec<String>,
    pub value: ValueAnalysis,
    pub context: TransactionContext,
    pub security_analysis: String,
    pub business_impact: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallAnalysis {
    pub name: String,
    pub description: String,
    pub arguments: Vec<ArgumentAnalysis>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmittedEventAnalysis {
    pub name: String,
    pub significance: String,
    pub parameters: Vec<ArgumentAnalysis>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentAnalysis {
    pub name: String,
    pub value: String,
    pub analysis: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueAnalysis {
    pub amount: String,
    pub significance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionContext {
    pub block_number: u64,
    pub from: String,
    pub to: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_entry_untagged_shapes() {
        let entries: Vec<SourceEntry> = serde_json::from_str(
            r#"[
                {"name": "Vault", "content": "contract Vault {}"},
                {"name": "Ownable", "explanation": "Single owner access control"}
            ]"#,
        )
        .unwrap();

        assert!(matches!(entries[0], SourceEntry::Content { .. }));
        assert!(matches!(entries[1], SourceEntry::Known { .. }));
        assert_eq!(entries[1].name(), "Ownable");
    }

    #[test]
    fn test_transaction_details_json_shape() {
        let details = TransactionDetails {
            hash: B256::repeat_byte(0x11),
            block_number: "19000000".to_string(),
            from: Address::repeat_byte(0x22),
            to: None,
            value: "0".to_string(),
            call: DecodedFunctionCall {
                function_name: "Deployment".to_string(),
                data: Bytes::new(),
                args: Some(DecodedArgs::new()),
            },
            logs: vec![DecodedLogEntry {
                event_name: "Unknown Event".to_string(),
                data: Bytes::new(),
                args: None,
            }],
        };

        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["blockNumber"], "19000000");
        assert!(json["to"].is_null());
        assert_eq!(json["call"]["functionName"], "Deployment");
        assert!(json["logs"][0].get("args").is_none());

        let back: TransactionDetails = serde_json::from_value(json).unwrap();
        assert_eq!(back, details);
    }
}
