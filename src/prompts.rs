//! System prompts and output schemas for the two explanation tasks.

use crate::codec::UNKNOWN_EVENT_NAME;
use crate::error::{ExplainError, LlmError};
use crate::llm::GenerationRequest;
use crate::models::{
    ContractDetails, EventExplanation, ExplainContractOutput, FunctionExplanation,
    TransactionDetails,
};
use serde::Serialize;
use serde_json::{Value, json};

pub const CONTRACT_SCHEMA_NAME: &str = "contract_explanation";
pub const TRANSACTION_SCHEMA_NAME: &str = "transaction_explanation";

pub const EXPLAIN_CONTRACT_PROMPT: &str = r#"You analyse Ethereum smart contracts. You receive a contract ABI, its name when known, and its source files when verified. Sources may be incomplete or missing, and well-known library files are replaced by a short explanation.

Respond with a single JSON object with these fields:
- "overview": a technical explanation of what the contract does, how it is structured and who is expected to use it.
- "functions": one entry per function in the ABI with its full signature (e.g. "transfer(address,uint256)"), name, description, parameters (name, type, description), returns (type, description), visibility (only public, external, internal, private, pure or view), whether it is payable, the modifiers applied to it with a short note on each, and its side effects.
- "events": one entry per event in the ABI with its full signature, name, a description of when it is emitted, and its parameters (name, type, indexed, description, and why the parameter matters).

Describe what the code actually does. When the source is missing, say what can be inferred from the ABI and flag it as inferred."#;

pub const EXPLAIN_TRANSACTION_PROMPT: &str = r#"You analyse individual Ethereum transactions. You receive one decoded transaction (function call, arguments, emitted events) and an explanation of the contract it interacted with: the overview, the function that was called and every event that was emitted.

Respond with a single JSON object with these fields:
- "summary": two or three sentences on what this transaction accomplished.
- "details": a breakdown with the function call (name, description, and each argument with its value and what it means here), each emitted event with its significance and parameter values, the state changes it caused, the ETH value moved, the context (block number, sender, recipient), a security analysis and the business impact.

Integer values larger than 2^53 are encoded as decimal strings ending in "n". Explain what this specific transaction did; the reader already has the contract documentation."#;

pub fn explain_contract_request(
    details: &ContractDetails,
) -> Result<GenerationRequest, ExplainError> {
    let input = serde_json::to_string_pretty(details)
        .map_err(|e| LlmError::Prompt(e.to_string()))?;

    Ok(GenerationRequest {
        system_prompt: EXPLAIN_CONTRACT_PROMPT.to_string(),
        schema_name: CONTRACT_SCHEMA_NAME,
        schema: contract_explanation_schema(),
        input,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionPromptInput<'a> {
    transaction: &'a TransactionDetails,
    contract_explanation: ContractContext<'a>,
}

#[derive(Serialize)]
struct ContractContext<'a> {
    overview: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    function: Option<&'a FunctionExplanation>,
    events: Vec<&'a EventExplanation>,
}

/// Builds the transaction prompt from the parts of the contract explanation
/// the transaction touches.
///
/// Every decoded event must be documented in the contract explanation;
/// logs that could not be decoded are passed through as they are.
pub fn explain_transaction_request(
    details: &TransactionDetails,
    contract: &ExplainContractOutput,
) -> Result<GenerationRequest, ExplainError> {
    let mut events: Vec<&EventExplanation> = Vec::new();
    for log in &details.logs {
        if log.event_name == UNKNOWN_EVENT_NAME {
            continue;
        }
        if events.iter().any(|e| e.name == log.event_name) {
            continue;
        }
        let event = contract
            .events
            .iter()
            .find(|e| e.name == log.event_name)
            .ok_or_else(|| ExplainError::EventNotFound(log.event_name.clone()))?;
        events.push(event);
    }

    let function = contract
        .functions
        .iter()
        .find(|f| f.name == details.call.function_name);

    let input = serde_json::to_string_pretty(&TransactionPromptInput {
        transaction: details,
        contract_explanation: ContractContext {
            overview: &contract.overview,
            function,
            events,
        },
    })
    .map_err(|e| LlmError::Prompt(e.to_string()))?;

    Ok(GenerationRequest {
        system_prompt: EXPLAIN_TRANSACTION_PROMPT.to_string(),
        schema_name: TRANSACTION_SCHEMA_NAME,
        schema: transaction_explanation_schema(),
        input,
    })
}

/// Strict JSON schema object: every property required, nothing extra.
fn object(properties: Value) -> Value {
    let required: Vec<Value> = properties
        .as_object()
        .map(|p| p.keys().map(|k| Value::String(k.clone())).collect())
        .unwrap_or_default();

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

fn array(items: Value) -> Value {
    json!({ "type": "array", "items": items })
}

fn string() -> Value {
    json!({ "type": "string" })
}

fn boolean() -> Value {
    json!({ "type": "boolean" })
}

pub fn contract_explanation_schema() -> Value {
    let function = object(json!({
        "signature": string(),
        "name": string(),
        "description": string(),
        "parameters": array(object(json!({
            "name": string(),
            "type": string(),
            "description": string()
        }))),
        "returns": array(object(json!({
            "type": string(),
            "description": string()
        }))),
        "visibility": array(json!({
            "type": "string",
            "enum": ["public", "external", "internal", "private", "pure", "view"]
        })),
        "payable": boolean(),
        "modifiers": array(string()),
        "sideEffects": array(string())
    }));

    let event = object(json!({
        "signature": string(),
        "name": string(),
        "description": string(),
        "parameters": array(object(json!({
            "name": string(),
            "type": string(),
            "indexed": boolean(),
            "description": string(),
            "significance": string()
        })))
    }));

    object(json!({
        "overview": string(),
        "functions": array(function),
        "events": array(event)
    }))
}

pub fn transaction_explanation_schema() -> Value {
    let argument = object(json!({
        "name": string(),
        "value": string(),
        "analysis": string()
    }));

    object(json!({
        "summary": string(),
        "details": object(json!({
            "functionCall": object(json!({
                "name": string(),
                "description": string(),
                "arguments": array(argument.clone())
            })),
            "emittedEvents": array(object(json!({
                "name": string(),
                "significance": string(),
                "parameters": array(argument)
            }))),
            "stateChanges": array(string()),
            "value": object(json!({
                "amount": string(),
                "significance": string()
            })),
            "context": object(json!({
                "blockNumber": { "type": "integer" },
                "from": string(),
                "to": string()
            })),
            "securityAnalysis": string(),
            "businessImpact": string()
        }))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DecodedArgs, DecodedFunctionCall, DecodedLogEntry};
    use alloy::json_abi::JsonAbi;
    use alloy_primitives::{Address, B256, Bytes};

    fn contract_explanation() -> ExplainContractOutput {
        serde_json::from_value(json!({
            "overview": "A staking vault",
            "functions": [{
                "signature": "deposit(uint256)",
                "name": "deposit",
                "description": "Deposits tokens",
                "parameters": [{"name": "amount", "type": "uint256", "description": "Amount"}],
                "returns": [],
                "visibility": ["external"],
                "payable": false,
                "modifiers": [],
                "sideEffects": ["Increases the caller's stake"]
            }],
            "events": [
                {
                    "signature": "Deposited(address,uint256)",
                    "name": "Deposited",
                    "description": "Emitted on deposit",
                    "parameters": []
                },
                {
                    "signature": "Withdrawn(address,uint256)",
                    "name": "Withdrawn",
                    "description": "Emitted on withdrawal",
                    "parameters": []
                }
            ]
        }))
        .unwrap()
    }

    fn log(name: &str) -> DecodedLogEntry {
        DecodedLogEntry {
            event_name: name.to_string(),
            data: Bytes::new(),
            args: (name != UNKNOWN_EVENT_NAME).then(DecodedArgs::new),
        }
    }

    fn transaction(logs: Vec<DecodedLogEntry>) -> TransactionDetails {
        TransactionDetails {
            hash: B256::repeat_byte(1),
            block_number: "100".to_string(),
            from: Address::repeat_byte(2),
            to: Some(Address::repeat_byte(3)),
            value: "0".to_string(),
            call: DecodedFunctionCall {
                function_name: "deposit".to_string(),
                data: Bytes::new(),
                args: Some(DecodedArgs::new()),
            },
            logs,
        }
    }

    #[test]
    fn test_transaction_prompt_includes_only_relevant_context() {
        let tx = transaction(vec![log("Deposited"), log("Deposited")]);
        let request = explain_transaction_request(&tx, &contract_explanation()).unwrap();

        let input: Value = serde_json::from_str(&request.input).unwrap();
        let context = &input["contractExplanation"];
        assert_eq!(context["overview"], "A staking vault");
        assert_eq!(context["function"]["name"], "deposit");
        assert_eq!(context["events"].as_array().unwrap().len(), 1);
        assert_eq!(input["transaction"]["blockNumber"], "100");
        assert_eq!(request.schema_name, TRANSACTION_SCHEMA_NAME);
    }

    #[test]
    fn test_undocumented_event_fails() {
        let tx = transaction(vec![log("Deposited"), log("Slashed")]);
        let result = explain_transaction_request(&tx, &contract_explanation());

        assert!(matches!(result, Err(ExplainError::EventNotFound(name)) if name == "Slashed"));
    }

    #[test]
    fn test_unknown_events_pass_through() {
        let tx = transaction(vec![log(UNKNOWN_EVENT_NAME), log("Withdrawn")]);
        let request = explain_transaction_request(&tx, &contract_explanation()).unwrap();

        let input: Value = serde_json::from_str(&request.input).unwrap();
        assert_eq!(input["contractExplanation"]["events"][0]["name"], "Withdrawn");
        assert_eq!(input["transaction"]["logs"][0]["eventName"], UNKNOWN_EVENT_NAME);
    }

    #[test]
    fn test_unmatched_function_is_omitted() {
        let mut tx = transaction(Vec::new());
        tx.call.function_name = "Deployment".to_string();

        let request = explain_transaction_request(&tx, &contract_explanation()).unwrap();
        let input: Value = serde_json::from_str(&request.input).unwrap();
        assert!(input["contractExplanation"].get("function").is_none());
    }

    #[test]
    fn test_contract_request_carries_abi() {
        let details = ContractDetails {
            abi: JsonAbi::parse(["function deposit(uint256 amount)"]).unwrap(),
            name: Some("Vault".to_string()),
            sources: None,
        };

        let request = explain_contract_request(&details).unwrap();
        let input: Value = serde_json::from_str(&request.input).unwrap();
        assert_eq!(input["name"], "Vault");
        assert_eq!(input["abi"][0]["name"], "deposit");
    }

    #[test]
    fn test_schemas_are_strict() {
        let schema = contract_explanation_schema();
        assert_eq!(schema["additionalProperties"], false);
        assert_eq!(schema["required"], json!(["overview", "functions", "events"]));

        let tx_schema = transaction_explanation_schema();
        let details = &tx_schema["properties"]["details"];
        assert_eq!(details["required"].as_array().unwrap().len(), 7);
    }
}
