//! Decodes transaction calldata and event logs against an ABI that is only
//! known at runtime.
//!
//! Nothing in here returns an error to the caller. A call or log that cannot
//! be decoded still yields a record, tagged as [`DecodeResult::Fallback`],
//! so one bad item never takes its siblings down with it.

use crate::bigint::{BigInt, encode_int};
use crate::models::{DecodedArgs, DecodedFunctionCall, DecodedLogEntry};
use alloy::dyn_abi::{DynSolType, DynSolValue, EventExt, Specifier};
use alloy::json_abi::{Event, Function, JsonAbi, Param};
use alloy_primitives::{Address, B256, Bytes, Selector, hex};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::trace;

pub const DEPLOYMENT_FUNCTION_NAME: &str = "Deployment";
pub const UNKNOWN_EVENT_NAME: &str = "Unknown Event";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeFailure {
    #[error("input too short to contain a function selector ({0} bytes)")]
    InputTooShort(usize),

    #[error("function selector not found in ABI: {0}")]
    UnknownSelector(Selector),

    #[error("log has no topics")]
    NoTopics,

    #[error("event signature not found in ABI: {0}")]
    UnknownEvent(B256),

    #[error("failed to decode data: {0}")]
    Abi(String),
}

impl From<alloy::dyn_abi::Error> for DecodeFailure {
    fn from(err: alloy::dyn_abi::Error) -> Self {
        DecodeFailure::Abi(err.to_string())
    }
}

/// Outcome of decoding one item. Both arms carry a usable record.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeResult<T> {
    Decoded(T),
    Fallback { value: T, reason: DecodeFailure },
}

impl<T> DecodeResult<T> {
    pub fn value(&self) -> &T {
        match self {
            DecodeResult::Decoded(value) | DecodeResult::Fallback { value, .. } => value,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            DecodeResult::Decoded(value) | DecodeResult::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, DecodeResult::Fallback { .. })
    }
}

/// An ABI indexed by function selector and event topic.
#[derive(Debug, Clone, Default)]
pub struct ContractAbi {
    functions: HashMap<Selector, Function>,
    events: HashMap<B256, Event>,
}

impl From<&JsonAbi> for ContractAbi {
    fn from(abi: &JsonAbi) -> Self {
        let functions = abi
            .functions()
            .map(|func| (func.selector(), func.clone()))
            .collect();

        // Anonymous events have no signature topic to match on.
        let events = abi
            .events()
            .filter(|event| !event.anonymous)
            .map(|event| (event.selector(), event.clone()))
            .collect();

        Self { functions, events }
    }
}

impl ContractAbi {
    pub fn function(&self, selector: &Selector) -> Option<&Function> {
        self.functions.get(selector)
    }

    pub fn event(&self, topic0: &B256) -> Option<&Event> {
        self.events.get(topic0)
    }
}

/// Decodes a transaction's calldata.
///
/// A transaction without a recipient is a contract creation and always
/// yields the `Deployment` record, whatever the ABI contains.
pub fn decode_function_call(
    abi: &ContractAbi,
    input: &Bytes,
    to: Option<Address>,
) -> DecodeResult<DecodedFunctionCall> {
    if to.is_none() {
        return DecodeResult::Decoded(DecodedFunctionCall {
            function_name: DEPLOYMENT_FUNCTION_NAME.to_string(),
            data: input.clone(),
            args: Some(DecodedArgs::new()),
        });
    }

    match try_decode_function_call(abi, input) {
        Ok(call) => DecodeResult::Decoded(call),
        Err(reason) => {
            trace!("Falling back on undecodable calldata: {}", reason);
            let selector_len = input.len().min(4);
            DecodeResult::Fallback {
                value: DecodedFunctionCall {
                    function_name: hex::encode_prefixed(&input[..selector_len]),
                    data: input.clone(),
                    args: None,
                },
                reason,
            }
        }
    }
}

fn try_decode_function_call(
    abi: &ContractAbi,
    input: &Bytes,
) -> Result<DecodedFunctionCall, DecodeFailure> {
    if input.len() < 4 {
        return Err(DecodeFailure::InputTooShort(input.len()));
    }

    let selector = Selector::from_slice(&input[..4]);
    let function = abi
        .function(&selector)
        .ok_or(DecodeFailure::UnknownSelector(selector))?;

    let input_types = function
        .inputs
        .iter()
        .map(|param| param.resolve())
        .collect::<Result<Vec<DynSolType>, _>>()?;

    let decoded = DynSolType::Tuple(input_types).abi_decode_params(&input[4..])?;
    let values = match decoded {
        DynSolValue::Tuple(values) => values,
        other => vec![other],
    };

    Ok(DecodedFunctionCall {
        function_name: function.name.clone(),
        data: input.clone(),
        args: Some(named_args(&function.inputs, values)),
    })
}

/// Decodes one event log. Failures produce an `Unknown Event` record with no
/// arguments.
pub fn decode_log(
    abi: &ContractAbi,
    topics: &[B256],
    data: &Bytes,
) -> DecodeResult<DecodedLogEntry> {
    match try_decode_log(abi, topics, data) {
        Ok(entry) => DecodeResult::Decoded(entry),
        Err(reason) => {
            trace!("Falling back on undecodable log: {}", reason);
            DecodeResult::Fallback {
                value: DecodedLogEntry {
                    event_name: UNKNOWN_EVENT_NAME.to_string(),
                    data: data.clone(),
                    args: None,
                },
                reason,
            }
        }
    }
}

fn try_decode_log(
    abi: &ContractAbi,
    topics: &[B256],
    data: &Bytes,
) -> Result<DecodedLogEntry, DecodeFailure> {
    let topic0 = topics.first().ok_or(DecodeFailure::NoTopics)?;
    let event = abi
        .event(topic0)
        .ok_or(DecodeFailure::UnknownEvent(*topic0))?;

    let decoded = event.decode_log_parts(topics.iter().copied(), data)?;

    // Indexed and body values come back split; put them back in declaration order.
    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();
    let mut args = DecodedArgs::new();
    for (position, input) in event.inputs.iter().enumerate() {
        let value = if input.indexed {
            indexed.next()
        } else {
            body.next()
        };
        let Some(value) = value else {
            return Err(DecodeFailure::Abi(format!(
                "missing value for parameter {position} of {}",
                event.name
            )));
        };
        args.insert(arg_name(&input.name, position), render_value(&value));
    }

    Ok(DecodedLogEntry {
        event_name: event.name.clone(),
        data: data.clone(),
        args: Some(args),
    })
}

fn named_args(params: &[Param], values: Vec<DynSolValue>) -> DecodedArgs {
    params
        .iter()
        .zip(values)
        .enumerate()
        .map(|(position, (param, value))| (arg_name(&param.name, position), render_value(&value)))
        .collect()
}

fn arg_name(name: &str, position: usize) -> String {
    if name.is_empty() {
        position.to_string()
    } else {
        name.to_string()
    }
}

/// Converts a decoded ABI value into JSON, keeping full integer precision.
pub fn render_value(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => encode_int(BigInt::from(*i)),
        DynSolValue::Uint(u, _) => encode_int(BigInt::from(*u)),
        DynSolValue::FixedBytes(word, size) => {
            Value::String(hex::encode_prefixed(&word[..(*size).min(32)]))
        }
        DynSolValue::Address(address) => Value::String(address.to_checksum(None)),
        DynSolValue::Function(function) => Value::String(hex::encode_prefixed(function.as_slice())),
        DynSolValue::Bytes(bytes) => Value::String(hex::encode_prefixed(bytes)),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            Value::Array(items.iter().map(render_value).collect())
        }
        #[allow(unreachable_patterns)]
        other => Value::String(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::sol;
    use alloy::sol_types::{SolCall, SolEvent};
    use alloy_primitives::{U256, address};
    use serde_json::json;

    sol! {
        function transfer(address to, uint256 amount) returns (bool);
        function setLabel(string, uint8);
        event Transfer(address indexed from, address indexed to, uint256 value);
        event Staked(uint256 amount, address indexed staker, uint64 lockUntil);
    }

    fn token_abi() -> ContractAbi {
        let abi: JsonAbi = serde_json::from_str(
            r#"[
                {
                    "type": "function",
                    "name": "transfer",
                    "inputs": [
                        {"name": "to", "type": "address"},
                        {"name": "amount", "type": "uint256"}
                    ],
                    "outputs": [{"name": "", "type": "bool"}],
                    "stateMutability": "nonpayable"
                },
                {
                    "type": "function",
                    "name": "setLabel",
                    "inputs": [
                        {"name": "", "type": "string"},
                        {"name": "", "type": "uint8"}
                    ],
                    "outputs": [],
                    "stateMutability": "nonpayable"
                },
                {
                    "type": "event",
                    "name": "Transfer",
                    "inputs": [
                        {"name": "from", "type": "address", "indexed": true},
                        {"name": "to", "type": "address", "indexed": true},
                        {"name": "value", "type": "uint256", "indexed": false}
                    ],
                    "anonymous": false
                },
                {
                    "type": "event",
                    "name": "Staked",
                    "inputs": [
                        {"name": "amount", "type": "uint256", "indexed": false},
                        {"name": "staker", "type": "address", "indexed": true},
                        {"name": "lockUntil", "type": "uint64", "indexed": false}
                    ],
                    "anonymous": false
                }
            ]"#,
        )
        .unwrap();
        ContractAbi::from(&abi)
    }

    const TOKEN: Address = address!("0x00000000000000000000000000000000000000aa");
    const ALICE: Address = address!("0x1111111111111111111111111111111111111111");
    const BOB: Address = address!("0x2222222222222222222222222222222222222222");

    fn transfer_log(value: U256) -> (Vec<B256>, Bytes) {
        let log = Transfer {
            from: ALICE,
            to: BOB,
            value,
        }
        .encode_log_data();
        (log.topics().to_vec(), log.data)
    }

    #[test]
    fn test_decode_function_call_with_named_args() {
        let amount = U256::from(1u8) << 70;
        let input: Bytes = transferCall { to: BOB, amount }.abi_encode().into();

        let result = decode_function_call(&token_abi(), &input, Some(TOKEN));

        assert!(!result.is_fallback());
        let call = result.into_inner();
        assert_eq!(call.function_name, "transfer");
        assert_eq!(call.data, input);
        let args = call.args.unwrap();
        assert_eq!(args["to"], json!(BOB.to_checksum(None)));
        assert_eq!(args["amount"], json!("1180591620717411303424n"));
    }

    #[test]
    fn test_unnamed_params_use_positional_keys() {
        let input: Bytes = setLabelCall {
            _0: "vault".to_string(),
            _1: 7,
        }
        .abi_encode()
        .into();

        let call = decode_function_call(&token_abi(), &input, Some(TOKEN)).into_inner();

        let args = call.args.unwrap();
        let keys: Vec<_> = args.keys().cloned().collect();
        assert_eq!(keys, vec!["0", "1"]);
        assert_eq!(args["0"], json!("vault"));
        assert_eq!(args["1"], json!(7));
    }

    #[test]
    fn test_deployment_ignores_abi() {
        // Calldata that would decode fine as a transfer.
        let input: Bytes = transferCall {
            to: BOB,
            amount: U256::from(5),
        }
        .abi_encode()
        .into();

        let result = decode_function_call(&token_abi(), &input, None);

        assert!(!result.is_fallback());
        let call = result.into_inner();
        assert_eq!(call.function_name, DEPLOYMENT_FUNCTION_NAME);
        assert_eq!(call.args, Some(DecodedArgs::new()));
    }

    #[test]
    fn test_unknown_selector_falls_back_to_selector() {
        let input = Bytes::from(vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0x01]);

        let result = decode_function_call(&token_abi(), &input, Some(TOKEN));

        match &result {
            DecodeResult::Fallback { value, reason } => {
                assert_eq!(value.function_name, "0xdeadbeef");
                assert_eq!(value.args, None);
                assert_eq!(value.data, input);
                assert!(matches!(reason, DecodeFailure::UnknownSelector(_)));
            }
            DecodeResult::Decoded(_) => panic!("expected fallback"),
        }
    }

    #[test]
    fn test_truncated_calldata_falls_back() {
        let mut input = transferCall {
            to: BOB,
            amount: U256::from(5),
        }
        .abi_encode();
        input.truncate(20);
        let input = Bytes::from(input);

        let result = decode_function_call(&token_abi(), &input, Some(TOKEN));

        assert!(result.is_fallback());
        assert_eq!(result.value().function_name, "0xa9059cbb");
    }

    #[test]
    fn test_short_input_falls_back() {
        let input = Bytes::from(vec![0x01, 0x02]);
        let result = decode_function_call(&token_abi(), &input, Some(TOKEN));

        assert!(matches!(
            result,
            DecodeResult::Fallback {
                reason: DecodeFailure::InputTooShort(2),
                ..
            }
        ));
        assert_eq!(result.value().function_name, "0x0102");
    }

    #[test]
    fn test_decode_log_restores_declaration_order() {
        let log = Staked {
            amount: U256::from(1_000u64),
            staker: ALICE,
            lockUntil: 1_700_000_000,
        }
        .encode_log_data();

        let entry = decode_log(&token_abi(), log.topics(), &log.data).into_inner();

        assert_eq!(entry.event_name, "Staked");
        let args = entry.args.unwrap();
        let keys: Vec<_> = args.keys().cloned().collect();
        assert_eq!(keys, vec!["amount", "staker", "lockUntil"]);
        assert_eq!(args["amount"], json!(1000));
        assert_eq!(args["staker"], json!(ALICE.to_checksum(None)));
        assert_eq!(args["lockUntil"], json!(1_700_000_000u64));
    }

    #[test]
    fn test_one_malformed_log_does_not_affect_siblings() {
        let abi = token_abi();
        let (first_topics, first_data) = transfer_log(U256::from(1));
        let (mut bad_topics, bad_data) = transfer_log(U256::from(2));
        let (third_topics, third_data) = transfer_log(U256::from(3));
        // Wrong topic count for Transfer.
        bad_topics.pop();

        let logs = [
            (first_topics, first_data),
            (bad_topics, bad_data.clone()),
            (third_topics, third_data),
        ];
        let decoded: Vec<_> = logs
            .iter()
            .map(|(topics, data)| decode_log(&abi, topics, data))
            .collect();

        assert_eq!(decoded.len(), 3);
        assert!(!decoded[0].is_fallback());
        assert!(decoded[1].is_fallback());
        assert!(!decoded[2].is_fallback());

        assert_eq!(decoded[0].value().args.as_ref().unwrap()["value"], json!(1));
        assert_eq!(decoded[1].value().event_name, UNKNOWN_EVENT_NAME);
        assert_eq!(decoded[1].value().args, None);
        assert_eq!(decoded[1].value().data, bad_data);
        assert_eq!(decoded[2].value().args.as_ref().unwrap()["value"], json!(3));
    }

    #[test]
    fn test_log_without_topics_or_known_signature() {
        let abi = token_abi();

        let no_topics = decode_log(&abi, &[], &Bytes::new());
        assert!(matches!(
            no_topics,
            DecodeResult::Fallback {
                reason: DecodeFailure::NoTopics,
                ..
            }
        ));

        let unknown = decode_log(&abi, &[B256::repeat_byte(0x42)], &Bytes::new());
        assert!(matches!(
            unknown,
            DecodeResult::Fallback {
                reason: DecodeFailure::UnknownEvent(_),
                ..
            }
        ));
    }

    #[test]
    fn test_render_nested_values() {
        let value = DynSolValue::Tuple(vec![
            DynSolValue::Bool(true),
            DynSolValue::Array(vec![
                DynSolValue::Uint(U256::from(1), 256),
                DynSolValue::Uint(U256::MAX, 256),
            ]),
            DynSolValue::FixedBytes(B256::repeat_byte(0xab), 2),
            DynSolValue::Bytes(vec![0x01, 0x02]),
        ]);

        let rendered = render_value(&value);

        assert_eq!(rendered[0], json!(true));
        assert_eq!(rendered[1][0], json!(1));
        assert!(rendered[1][1].as_str().unwrap().ends_with('n'));
        assert_eq!(rendered[2], json!("0xabab"));
        assert_eq!(rendered[3], json!("0x0102"));
    }

    #[test]
    fn test_string_arguments_are_rendered_verbatim() {
        // Only the parameter's ABI type separates this from an encoded integer.
        let rendered = render_value(&DynSolValue::String("100n".to_string()));

        assert_eq!(rendered, json!("100n"));
        assert!(crate::bigint::is_encoded_bigint(rendered.as_str().unwrap()));
    }
}
