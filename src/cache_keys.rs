//! Cache keys for every resource the explainer persists.
//!
//! Addresses and hashes are formatted from their typed values, so the
//! lowercase hex form is used regardless of how the caller spelled them.

use crate::models::ContractInput;
use alloy_primitives::B256;

const EXPLAIN_CONTRACT_PREFIX: &str = "contract_explain";
const CONTRACT_DETAILS_PREFIX: &str = "contract_details";
const TRANSACTION_DETAILS_PREFIX: &str = "transaction_details";
const TRANSACTION_EXPLANATION_PREFIX: &str = "transaction_explanation";

pub fn explain_contract_key(input: &ContractInput) -> String {
    format!(
        "{EXPLAIN_CONTRACT_PREFIX}:{}:{:?}",
        input.chain_id, input.contract_address
    )
}

pub fn contract_details_key(input: &ContractInput) -> String {
    format!(
        "{CONTRACT_DETAILS_PREFIX}:{}:{:?}",
        input.chain_id, input.contract_address
    )
}

pub fn transaction_details_key(hash: &B256) -> String {
    format!("{TRANSACTION_DETAILS_PREFIX}:{hash:?}")
}

pub fn transaction_explanation_key(hash: &B256) -> String {
    format!("{TRANSACTION_EXPLANATION_PREFIX}:{hash:?}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, address};
    use std::str::FromStr;

    fn input() -> ContractInput {
        ContractInput {
            chain_id: 1,
            contract_address: address!("0xaAaAaAaaAaAaAaaAaAAAAAAAAaaaAaAaAaaAaaAa"),
        }
    }

    #[test]
    fn test_keys_are_deterministic() {
        assert_eq!(explain_contract_key(&input()), explain_contract_key(&input()));
        assert_eq!(
            explain_contract_key(&input()),
            "contract_explain:1:0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
    }

    #[test]
    fn test_resource_kinds_never_collide() {
        let hash = B256::repeat_byte(0xaa);
        let keys = [
            explain_contract_key(&input()),
            contract_details_key(&input()),
            transaction_details_key(&hash),
            transaction_explanation_key(&hash),
        ];

        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_address_spelling_does_not_change_key() {
        let checksummed = Address::from_str("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed").unwrap();
        let lowercase = Address::from_str("0x5aaeb6053f3e94c9b9a09f33669435e7ef1beaed").unwrap();

        let key = |contract_address| {
            contract_details_key(&ContractInput {
                chain_id: 1,
                contract_address,
            })
        };
        assert_eq!(key(checksummed), key(lowercase));
    }

    #[test]
    fn test_chain_is_part_of_contract_keys() {
        let mainnet = input();
        let other = ContractInput {
            chain_id: 10,
            ..mainnet
        };
        assert_ne!(explain_contract_key(&mainnet), explain_contract_key(&other));
    }
}
