use crate::models::{
    ContractDetails, ExplainContractOutput, ExplainTransactionOutput, SourceEntry,
    TransactionDetails,
};
use alloy_primitives::U256;
use alloy_primitives::utils::format_units;
use comfy_table::{Cell, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};
use csv::Writer;
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Csv,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "csv" => OutputFormat::Csv,
            _ => OutputFormat::Table,
        }
    }
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(header);
    table
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

fn to_csv(header: &[&str], rows: Vec<Vec<String>>) -> String {
    let mut wtr = Writer::from_writer(vec![]);
    let _ = wtr.write_record(header);
    for row in rows {
        let _ = wtr.write_record(&row);
    }
    String::from_utf8(wtr.into_inner().unwrap_or_default()).unwrap_or_default()
}

/// Wei as ETH, falling back to the raw string when it is not a number.
fn format_ether(wei: &str) -> String {
    U256::from_str_radix(wei, 10)
        .ok()
        .and_then(|v| format_units(v, 18u8).ok())
        .unwrap_or_else(|| wei.to_string())
}

fn format_tx_hash(hash: &str) -> String {
    if hash.len() <= 12 {
        return hash.to_string();
    }
    format!("{}...{}", &hash[..6], &hash[hash.len() - 4..])
}

fn event_names(tx: &TransactionDetails) -> String {
    tx.logs
        .iter()
        .map(|log| log.event_name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_args(args: Option<&serde_json::Map<String, Value>>) -> String {
    match args {
        Some(args) if !args.is_empty() => args
            .iter()
            .map(|(name, value)| match value {
                Value::String(s) => format!("{name}={s}"),
                other => format!("{name}={other}"),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Some(_) => String::new(),
        None => "(not decoded)".to_string(),
    }
}

pub fn format_transactions(transactions: &[TransactionDetails], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            if transactions.is_empty() {
                return "No transactions found.".to_string();
            }

            let mut table = new_table(vec![
                "Block",
                "Tx Hash",
                "From",
                "Function",
                "Events",
                "Value (ETH)",
            ]);
            for tx in transactions {
                table.add_row(vec![
                    Cell::new(&tx.block_number),
                    Cell::new(format_tx_hash(&format!("{:?}", tx.hash))),
                    Cell::new(format!("{:#}", tx.from)),
                    Cell::new(&tx.call.function_name),
                    Cell::new(event_names(tx)),
                    Cell::new(format_ether(&tx.value)),
                ]);
            }
            table.to_string()
        }
        OutputFormat::Json => to_json(transactions),
        OutputFormat::Csv => to_csv(
            &["block_number", "transaction_hash", "from", "to", "function", "events", "value_wei"],
            transactions
                .iter()
                .map(|tx| {
                    vec![
                        tx.block_number.clone(),
                        format!("{:?}", tx.hash),
                        format!("{:?}", tx.from),
                        tx.to.map(|to| format!("{to:?}")).unwrap_or_default(),
                        tx.call.function_name.clone(),
                        event_names(tx),
                        tx.value.clone(),
                    ]
                })
                .collect(),
        ),
    }
}

pub fn format_transaction(tx: &TransactionDetails, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            let mut table = new_table(vec!["Field", "Value"]);
            let to = tx
                .to
                .map(|to| format!("{to:?}"))
                .unwrap_or_else(|| "(contract creation)".to_string());
            table.add_row(vec![Cell::new("Hash"), Cell::new(format!("{:?}", tx.hash))]);
            table.add_row(vec![Cell::new("Block"), Cell::new(&tx.block_number)]);
            table.add_row(vec![Cell::new("From"), Cell::new(format!("{:?}", tx.from))]);
            table.add_row(vec![Cell::new("To"), Cell::new(to)]);
            table.add_row(vec![Cell::new("Value (ETH)"), Cell::new(format_ether(&tx.value))]);
            table.add_row(vec![
                Cell::new("Function"),
                Cell::new(format!(
                    "{}({})",
                    tx.call.function_name,
                    format_args(tx.call.args.as_ref())
                )),
            ]);
            for (i, log) in tx.logs.iter().enumerate() {
                table.add_row(vec![
                    Cell::new(format!("Log #{i}")),
                    Cell::new(format!("{}({})", log.event_name, format_args(log.args.as_ref()))),
                ]);
            }
            table.to_string()
        }
        OutputFormat::Json => to_json(tx),
        OutputFormat::Csv => to_csv(
            &["transaction_hash", "kind", "name", "arguments"],
            std::iter::once(vec![
                format!("{:?}", tx.hash),
                "function".to_string(),
                tx.call.function_name.clone(),
                format_args(tx.call.args.as_ref()),
            ])
            .chain(tx.logs.iter().map(|log| {
                vec![
                    format!("{:?}", tx.hash),
                    "event".to_string(),
                    log.event_name.clone(),
                    format_args(log.args.as_ref()),
                ]
            }))
            .collect(),
        ),
    }
}

pub fn format_contract_details(details: &ContractDetails, format: &OutputFormat) -> String {
    let sources: Vec<(&str, &str)> = details
        .sources
        .iter()
        .flatten()
        .map(|source| match source {
            SourceEntry::Content { name, .. } => (name.as_str(), "source"),
            SourceEntry::Known { name, .. } => (name.as_str(), "known"),
        })
        .collect();

    match format {
        OutputFormat::Table => {
            let mut table = new_table(vec!["Field", "Value"]);
            table.add_row(vec![
                Cell::new("Name"),
                Cell::new(details.name.as_deref().unwrap_or("(unknown)")),
            ]);
            table.add_row(vec![Cell::new("Functions"), Cell::new(details.abi.functions().count())]);
            table.add_row(vec![Cell::new("Events"), Cell::new(details.abi.events().count())]);
            for (name, kind) in &sources {
                table.add_row(vec![Cell::new(format!("Source ({kind})")), Cell::new(name)]);
            }
            table.to_string()
        }
        OutputFormat::Json => to_json(details),
        OutputFormat::Csv => to_csv(
            &["source", "kind"],
            sources
                .iter()
                .map(|(name, kind)| vec![name.to_string(), kind.to_string()])
                .collect(),
        ),
    }
}

pub fn format_contract_explanation(
    output: &ExplainContractOutput,
    format: &OutputFormat,
) -> String {
    match format {
        OutputFormat::Table => {
            let mut table = new_table(vec!["Kind", "Signature", "Description"]);
            table.add_row(vec![Cell::new("overview"), Cell::new(""), Cell::new(&output.overview)]);
            for function in &output.functions {
                table.add_row(vec![
                    Cell::new("function"),
                    Cell::new(&function.signature),
                    Cell::new(&function.description),
                ]);
            }
            for event in &output.events {
                table.add_row(vec![
                    Cell::new("event"),
                    Cell::new(&event.signature),
                    Cell::new(&event.description),
                ]);
            }
            table.to_string()
        }
        OutputFormat::Json => to_json(output),
        OutputFormat::Csv => to_csv(
            &["kind", "signature", "description"],
            std::iter::once(vec!["overview".to_string(), String::new(), output.overview.clone()])
                .chain(output.functions.iter().map(|f| {
                    vec!["function".to_string(), f.signature.clone(), f.description.clone()]
                }))
                .chain(output.events.iter().map(|e| {
                    vec!["event".to_string(), e.signature.clone(), e.description.clone()]
                }))
                .collect(),
        ),
    }
}

pub fn format_transaction_explanation(
    output: &ExplainTransactionOutput,
    format: &OutputFormat,
) -> String {
    let details = &output.details;
    let rows: Vec<(&str, String)> = vec![
        ("Summary", output.summary.clone()),
        (
            "Function",
            format!("{}: {}", details.function_call.name, details.function_call.description),
        ),
        (
            "Events",
            details
                .emitted_events
                .iter()
                .map(|e| format!("{}: {}", e.name, e.significance))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        ("State changes", details.state_changes.join("\n")),
        (
            "Value",
            format!("{} ({})", details.value.amount, details.value.significance),
        ),
        ("Security", details.security_analysis.clone()),
        ("Business impact", details.business_impact.clone()),
    ];

    match format {
        OutputFormat::Table => {
            let mut table = new_table(vec!["Field", "Value"]);
            for (field, value) in rows {
                table.add_row(vec![Cell::new(field), Cell::new(value)]);
            }
            table.to_string()
        }
        OutputFormat::Json => to_json(output),
        OutputFormat::Csv => to_csv(
            &["field", "value"],
            rows.into_iter()
                .map(|(field, value)| vec![field.to_string(), value])
                .collect(),
        ),
    }
}

/// One-line progress report for a partial explanation.
pub fn format_progress(partial: &Value) -> String {
    let count = |field: &str| {
        partial
            .get(field)
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    };
    let summary = json!({
        "functions": count("functions"),
        "events": count("events"),
    });
    format!("... received {summary}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DecodedArgs, DecodedFunctionCall, DecodedLogEntry};
    use alloy_primitives::{Address, B256, Bytes};

    fn transaction() -> TransactionDetails {
        let mut args = DecodedArgs::new();
        args.insert("amount".to_string(), json!("9007199254740993n"));
        TransactionDetails {
            hash: B256::repeat_byte(0xab),
            block_number: "19000000".to_string(),
            from: Address::repeat_byte(0x11),
            to: Some(Address::repeat_byte(0x22)),
            value: "1500000000000000000".to_string(),
            call: DecodedFunctionCall {
                function_name: "deposit".to_string(),
                data: Bytes::new(),
                args: Some(args),
            },
            logs: vec![DecodedLogEntry {
                event_name: "Unknown Event".to_string(),
                data: Bytes::new(),
                args: None,
            }],
        }
    }

    #[test]
    fn test_output_format_parsing() {
        assert_eq!(OutputFormat::from("JSON"), OutputFormat::Json);
        assert_eq!(OutputFormat::from("csv"), OutputFormat::Csv);
        assert_eq!(OutputFormat::from("anything"), OutputFormat::Table);
    }

    #[test]
    fn test_format_ether() {
        assert_eq!(format_ether("1500000000000000000"), "1.500000000000000000");
        assert_eq!(format_ether("garbage"), "garbage");
    }

    #[test]
    fn test_transactions_csv() {
        let csv = format_transactions(&[transaction()], &OutputFormat::Csv);
        let mut lines = csv.lines();

        assert_eq!(
            lines.next(),
            Some("block_number,transaction_hash,from,to,function,events,value_wei")
        );
        let row = lines.next().unwrap();
        assert!(row.starts_with("19000000,0xabab"));
        assert!(row.contains("deposit,Unknown Event,1500000000000000000"));
    }

    #[test]
    fn test_transaction_table_shows_arguments() {
        let table = format_transaction(&transaction(), &OutputFormat::Table);

        assert!(table.contains("deposit(amount=9007199254740993n)"));
        assert!(table.contains("Unknown Event((not decoded))"));
    }

    #[test]
    fn test_empty_transactions() {
        assert_eq!(
            format_transactions(&[], &OutputFormat::Table),
            "No transactions found."
        );
        assert_eq!(format_transactions(&[], &OutputFormat::Json), "[]");
    }

    #[test]
    fn test_progress_counts_entries() {
        let partial = json!({"overview": "A", "functions": [{}, {}]});
        assert_eq!(format_progress(&partial), r#"... received {"functions":2,"events":0}"#);
    }
}
