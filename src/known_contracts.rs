//! Widely used library contracts whose behaviour is summarised up front, so
//! their full source never has to be sent to the model.

use alloy::json_abi::JsonAbi;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownContract {
    pub name: &'static str,
    /// Matched as a substring of the source path.
    pub path: &'static str,
    pub explanation: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownInterface {
    pub name: &'static str,
    pub path: &'static str,
    pub explanation: &'static str,
    /// Function names that must all appear in an ABI for it to match.
    pub functions: &'static [&'static str],
}

pub const KNOWN_CONTRACTS: &[KnownContract] = &[
    KnownContract {
        name: "AccessControl",
        path: "@openzeppelin/contracts/access/AccessControl.sol",
        explanation: "Role-based access control: functions are restricted to accounts holding a given role, and roles are granted and revoked by their admin role.",
    },
    KnownContract {
        name: "Ownable",
        path: "@openzeppelin/contracts/access/Ownable.sol",
        explanation: "Single-owner access control: one account may call owner-restricted functions and can transfer or renounce ownership.",
    },
    KnownContract {
        name: "Ownable2Step",
        path: "@openzeppelin/contracts/access/Ownable2Step.sol",
        explanation: "Ownership transfer in two steps: the new owner must accept before the transfer takes effect.",
    },
    KnownContract {
        name: "Pausable",
        path: "@openzeppelin/contracts/utils/Pausable.sol",
        explanation: "Emergency stop: functions guarded by whenNotPaused revert while the contract is paused.",
    },
    KnownContract {
        name: "ReentrancyGuard",
        path: "@openzeppelin/contracts/utils/ReentrancyGuard.sol",
        explanation: "Blocks nested calls into functions marked nonReentrant.",
    },
    KnownContract {
        name: "ERC20",
        path: "@openzeppelin/contracts/token/ERC20/ERC20.sol",
        explanation: "Reference ERC20 fungible token: balances, allowances, transfers, and Transfer/Approval events.",
    },
    KnownContract {
        name: "SafeERC20",
        path: "@openzeppelin/contracts/token/ERC20/utils/SafeERC20.sol",
        explanation: "Wrappers around ERC20 calls that revert on failure, including for tokens that return no value.",
    },
    KnownContract {
        name: "ERC721",
        path: "@openzeppelin/contracts/token/ERC721/ERC721.sol",
        explanation: "Reference ERC721 non-fungible token: ownership, approvals and safe transfers of unique token ids.",
    },
    KnownContract {
        name: "ERC1155",
        path: "@openzeppelin/contracts/token/ERC1155/ERC1155.sol",
        explanation: "Reference ERC1155 multi-token: many fungible and non-fungible token ids in one contract, with batch transfers.",
    },
    KnownContract {
        name: "ERC1967Proxy",
        path: "@openzeppelin/contracts/proxy/ERC1967/ERC1967Proxy.sol",
        explanation: "Upgradeable proxy that delegates every call to an implementation address stored in the ERC1967 slot.",
    },
    KnownContract {
        name: "TransparentUpgradeableProxy",
        path: "@openzeppelin/contracts/proxy/transparent/TransparentUpgradeableProxy.sol",
        explanation: "Upgradeable proxy where only the admin can call upgrade functions and everyone else is forwarded to the implementation.",
    },
    KnownContract {
        name: "UUPSUpgradeable",
        path: "@openzeppelin/contracts/proxy/utils/UUPSUpgradeable.sol",
        explanation: "Upgrade logic that lives in the implementation itself, guarded by an overridable authorization hook.",
    },
    KnownContract {
        name: "Initializable",
        path: "@openzeppelin/contracts/proxy/utils/Initializable.sol",
        explanation: "One-time initializer guard used instead of constructors by proxied contracts.",
    },
    KnownContract {
        name: "ECDSA",
        path: "@openzeppelin/contracts/utils/cryptography/ECDSA.sol",
        explanation: "Signature recovery helpers for secp256k1 signatures.",
    },
    KnownContract {
        name: "MerkleProof",
        path: "@openzeppelin/contracts/utils/cryptography/MerkleProof.sol",
        explanation: "Verification of Merkle inclusion proofs, typically for allowlists and airdrops.",
    },
];

pub const KNOWN_INTERFACES: &[KnownInterface] = &[
    KnownInterface {
        name: "IERC20",
        path: "@openzeppelin/contracts/token/ERC20/IERC20.sol",
        explanation: "ERC20 fungible token interface.",
        functions: &[
            "totalSupply",
            "balanceOf",
            "transfer",
            "allowance",
            "approve",
            "transferFrom",
        ],
    },
    KnownInterface {
        name: "IERC721",
        path: "@openzeppelin/contracts/token/ERC721/IERC721.sol",
        explanation: "ERC721 non-fungible token interface.",
        functions: &[
            "balanceOf",
            "ownerOf",
            "safeTransferFrom",
            "transferFrom",
            "approve",
            "setApprovalForAll",
            "getApproved",
            "isApprovedForAll",
        ],
    },
    KnownInterface {
        name: "IERC1155",
        path: "@openzeppelin/contracts/token/ERC1155/IERC1155.sol",
        explanation: "ERC1155 multi-token interface.",
        functions: &[
            "balanceOf",
            "balanceOfBatch",
            "setApprovalForAll",
            "isApprovedForAll",
            "safeTransferFrom",
            "safeBatchTransferFrom",
        ],
    },
];

/// Library explanation for a source path, if the path belongs to one.
pub fn explanation_for_path(path: &str) -> Option<(&'static str, &'static str)> {
    KNOWN_CONTRACTS
        .iter()
        .map(|k| (k.name, k.path, k.explanation))
        .chain(KNOWN_INTERFACES.iter().map(|k| (k.name, k.path, k.explanation)))
        .find(|(_, known_path, _)| path.contains(known_path))
        .map(|(name, _, explanation)| (name, explanation))
}

/// Interfaces the ABI fully implements.
pub fn detect_interfaces(abi: &JsonAbi) -> Vec<&'static KnownInterface> {
    KNOWN_INTERFACES
        .iter()
        .filter(|interface| {
            interface
                .functions
                .iter()
                .all(|name| abi.functions.contains_key(*name))
        })
        .collect()
}
