use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// Core types
pub type Wei = u128;
pub type Timestamp = u64;
pub type BlockNumber = u64;

pub const WEI_PER_ETHER: Wei = 1_000_000_000_000_000_000;
pub const WEI_PER_GWEI: Wei = 1_000_000_000;
const ETHER_DECIMALS: usize = 18;

#[derive(Debug, Error, PartialEq)]
pub enum HexError {
    #[error("invalid hex: {0}")]
    Invalid(#[from] hex::FromHexError),
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

macro_rules! fixed_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            pub const LEN: usize = $len;

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            /// Short prefix for log lines.
            pub fn short(&self) -> String {
                format!("0x{}", hex::encode(&self.0[0..4]))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(self, f)
            }
        }

        impl FromStr for $name {
            type Err = HexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let digits = s
                    .strip_prefix("0x")
                    .or_else(|| s.strip_prefix("0X"))
                    .unwrap_or(s);
                let bytes = hex::decode(digits)?;
                let raw: [u8; $len] = bytes.as_slice().try_into().map_err(|_| HexError::Length {
                    expected: $len,
                    actual: bytes.len(),
                })?;
                Ok(Self(raw))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(de::Error::custom)
            }
        }
    };
}

fixed_bytes!(
    /// 20-byte account or contract address.
    Address,
    20
);

fixed_bytes!(
    /// 32-byte transaction hash.
    TxHash,
    32
);

/// Takes the low 20 bytes of a keccak digest, the way account addresses are formed.
pub fn address_from_digest(digest: &[u8; 32]) -> Address {
    let mut addr = [0u8; 20];
    addr.copy_from_slice(&digest[12..32]);
    Address(addr)
}

/// Serializes `u128` amounts as decimal strings so JSON clients keep full precision.
pub mod u128_string {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitError {
    #[error("empty amount")]
    Empty,
    #[error("negative amounts are not allowed")]
    Negative,
    #[error("invalid amount: {0:?}")]
    Invalid(String),
    #[error("more than 18 decimal places")]
    TooPrecise,
    #[error("amount does not fit in 128 bits of wei")]
    Overflow,
}

pub fn ether(amount: u128) -> Wei {
    amount * WEI_PER_ETHER
}

/// Parses a decimal ether amount such as `"0.01"` into wei without going through floats.
pub fn to_wei(amount: &str) -> Result<Wei, UnitError> {
    let amount = amount.trim();
    if amount.is_empty() {
        return Err(UnitError::Empty);
    }
    if amount.starts_with('-') {
        return Err(UnitError::Negative);
    }

    let (whole, fraction) = match amount.split_once('.') {
        Some((w, f)) => (w, f),
        None => (amount, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(UnitError::Invalid(amount.to_string()));
    }
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || !all_digits(fraction) {
        return Err(UnitError::Invalid(amount.to_string()));
    }
    if fraction.len() > ETHER_DECIMALS {
        return Err(UnitError::TooPrecise);
    }

    let whole_wei = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<u128>()
            .map_err(|_| UnitError::Overflow)?
            .checked_mul(WEI_PER_ETHER)
            .ok_or(UnitError::Overflow)?
    };
    let fraction_wei = if fraction.is_empty() {
        0
    } else {
        format!("{fraction:0<width$}", width = ETHER_DECIMALS)
            .parse::<u128>()
            .map_err(|_| UnitError::Invalid(amount.to_string()))?
    };

    whole_wei
        .checked_add(fraction_wei)
        .ok_or(UnitError::Overflow)
}

/// Renders wei as a decimal ether string with trailing zeros trimmed.
pub fn format_ether(wei: Wei) -> String {
    let whole = wei / WEI_PER_ETHER;
    let fraction = wei % WEI_PER_ETHER;
    if fraction == 0 {
        return whole.to_string();
    }
    let digits = format!("{fraction:0width$}", width = ETHER_DECIMALS);
    format!("{whole}.{}", digits.trim_end_matches('0'))
}
