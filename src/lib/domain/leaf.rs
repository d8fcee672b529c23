use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::sol_types::SolValue;

/// Errors raised while turning raw input into a leaf, before any hashing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeafError {
    #[error("invalid account {input:?}: {reason}")]
    InvalidAccount { input: String, reason: &'static str },

    #[error("invalid amount {input:?}: {reason}")]
    InvalidAmount { input: String, reason: &'static str },
}

/// A hashed `(account, amount)` commitment.
///
/// The digest is computed once in the constructor and is a pure function of
/// the two inputs: `keccak256(abi.encode(address, uint256))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Leaf {
    account: Address,
    amount: U256,
    digest: B256,
}

impl Leaf {
    pub fn new(account: Address, amount: U256) -> Self {
        let digest = hash(&encode(account, amount));
        Self {
            account,
            amount,
            digest,
        }
    }

    /// Parse a leaf from its textual form (hex address, decimal amount).
    pub fn parse(account: &str, amount: &str) -> Result<Self, LeafError> {
        Ok(Self::new(parse_account(account)?, parse_amount(amount)?))
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn amount(&self) -> U256 {
        self.amount
    }

    pub fn digest(&self) -> B256 {
        self.digest
    }
}

/// ABI-encode `(address, uint256)` exactly as `abi.encode` does on-chain:
/// the address left-padded to a 32-byte word, then the amount as a
/// big-endian 32-byte word.
pub fn encode(account: Address, amount: U256) -> Vec<u8> {
    (account, amount).abi_encode_params()
}

/// Single Keccak-256 over the encoded bytes.
pub fn hash(bytes: &[u8]) -> B256 {
    keccak256(bytes)
}

/// Parse a 20-byte account from hex, with or without `0x`, in any case.
pub fn parse_account(input: &str) -> Result<Address, LeafError> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    let invalid = |reason| LeafError::InvalidAccount {
        input: input.to_string(),
        reason,
    };

    if digits.len() != 40 {
        return Err(invalid("expected 40 hex digits"));
    }

    let mut bytes = [0u8; 20];
    hex::decode_to_slice(digits, &mut bytes).map_err(|_| invalid("not valid hex"))?;
    Ok(Address::from(bytes))
}

/// Parse a non-negative base-10 amount that fits in 256 bits.
pub fn parse_amount(input: &str) -> Result<U256, LeafError> {
    let trimmed = input.trim();
    let invalid = |reason| LeafError::InvalidAmount {
        input: input.to_string(),
        reason,
    };

    if trimmed.is_empty() {
        return Err(invalid("empty amount"));
    }
    if trimmed.starts_with('-') {
        return Err(invalid("amount must not be negative"));
    }
    if !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("expected decimal digits"));
    }

    U256::from_str_radix(trimmed, 10).map_err(|_| invalid("does not fit in uint256"))
}

/// Canonical rendering of an account: lowercase hex with `0x` prefix.
pub fn format_account(account: Address) -> String {
    format!("0x{}", hex::encode(account))
}
