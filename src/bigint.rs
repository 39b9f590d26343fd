//! Precision-preserving integer encoding for JSON payloads.
//!
//! Integers whose magnitude fits in the IEEE-754 safe range are emitted as
//! JSON numbers. Anything larger becomes a decimal string carrying the
//! [`BIGINT_SUFFIX`] marker (`"1180591620717411303424n"`), which lets
//! [`decode_int`] restore the exact value.

use alloy_primitives::{I256, U256};
use serde_json::{Number, Value};

/// Marks an oversized integer rendered as a string.
///
/// The marker is not escaped: an ABI `string` argument whose text is digits
/// followed by `n` (`"100n"`) renders identically to an encoded integer.
/// Consumers that must tell them apart read the parameter's ABI type instead
/// of the JSON shape.
pub const BIGINT_SUFFIX: char = 'n';

/// 2^53 - 1, the largest integer a double represents exactly.
pub const MAX_SAFE_INTEGER: u64 = 9_007_199_254_740_991;

/// A signed integer of up to 256 bits of magnitude.
///
/// Holds both `uint256` and `int256` ranges. Zero is never negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BigInt {
    negative: bool,
    magnitude: U256,
}

impl BigInt {
    pub fn new(negative: bool, magnitude: U256) -> Self {
        Self {
            negative: negative && !magnitude.is_zero(),
            magnitude,
        }
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn magnitude(&self) -> U256 {
        self.magnitude
    }

    pub fn is_safe(&self) -> bool {
        self.magnitude <= U256::from(MAX_SAFE_INTEGER)
    }
}

impl From<U256> for BigInt {
    fn from(value: U256) -> Self {
        Self::new(false, value)
    }
}

impl From<I256> for BigInt {
    fn from(value: I256) -> Self {
        let (sign, abs) = value.into_sign_and_abs();
        Self::new(sign.is_negative(), abs)
    }
}

impl From<u64> for BigInt {
    fn from(value: u64) -> Self {
        Self::new(false, U256::from(value))
    }
}

impl From<i64> for BigInt {
    fn from(value: i64) -> Self {
        Self::new(value < 0, U256::from(value.unsigned_abs()))
    }
}

impl std::fmt::Display for BigInt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.negative {
            write!(f, "-{}", self.magnitude)
        } else {
            write!(f, "{}", self.magnitude)
        }
    }
}

/// Renders an integer as a JSON number when safe, otherwise as a suffixed
/// decimal string.
pub fn encode_int(value: BigInt) -> Value {
    if value.is_safe() {
        let magnitude = value.magnitude.to::<u64>();
        if value.negative {
            // Safe magnitudes always fit in i64.
            Value::Number(Number::from(-(magnitude as i64)))
        } else {
            Value::Number(Number::from(magnitude))
        }
    } else {
        Value::String(format!("{value}{BIGINT_SUFFIX}"))
    }
}

/// Reverses [`encode_int`]. Returns `None` for values that are neither an
/// integral JSON number nor a suffixed integer string.
pub fn decode_int(value: &Value) -> Option<BigInt> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(BigInt::from)
            .or_else(|| n.as_i64().map(BigInt::from)),
        Value::String(s) => parse_suffixed(s),
        _ => None,
    }
}

/// True when `s` is an encoded oversized integer rather than plain text.
pub fn is_encoded_bigint(s: &str) -> bool {
    parse_suffixed(s).is_some()
}

fn parse_suffixed(s: &str) -> Option<BigInt> {
    let body = s.strip_suffix(BIGINT_SUFFIX)?;
    let (negative, digits) = match body.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let magnitude = U256::from_str_radix(digits, 10).ok()?;
    Some(BigInt::new(negative, magnitude))
}
