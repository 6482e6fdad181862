use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Declares a fixed-width byte identifier rendered as `0x`-prefixed lowercase hex.
macro_rules! hex_identifier {
    ($(#[$meta:meta])* $name:ident, $len:expr, $err:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Width of the identifier in bytes.
            pub const LEN: usize = $len;

            /// Build from a byte slice of exactly `LEN` bytes.
            pub fn from_slice(bytes: &[u8]) -> Result<Self, CoreError> {
                let arr: [u8; $len] = bytes.try_into().map_err(|_| {
                    CoreError::$err(format!(
                        "expected {} bytes, got {}",
                        $len,
                        bytes.len()
                    ))
                })?;
                Ok(Self(arr))
            }

            /// Raw bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// `0x`-prefixed lowercase hex.
            pub fn to_hex(&self) -> String {
                format!("0x{}", hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let stripped = s
                    .strip_prefix("0x")
                    .or_else(|| s.strip_prefix("0X"))
                    .unwrap_or(s);
                let bytes = hex::decode(stripped)
                    .map_err(|e| CoreError::$err(format!("{}: {}", s, e)))?;
                Self::from_slice(&bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

hex_identifier!(
    /// A 20-byte account address (wallet, signer, token contract, adjudicator).
    Address,
    20,
    InvalidAddress
);

hex_identifier!(
    /// 32-byte identifier of an on-chain custody channel.
    ChannelId,
    32,
    InvalidIdentifier
);

hex_identifier!(
    /// 32-byte identifier of an app session, derived from its definition.
    SessionId,
    32,
    InvalidIdentifier
);

impl Address {
    /// The zero address.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Whether this is the zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

/// Identifier of an account bucket inside a wallet's ledger.
///
/// Either a wallet address (the main bucket), a channel identifier (escrow
/// bucket) or an app-session identifier (shared virtual balance).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Wrap an opaque account identifier, normalised to lowercase.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().to_lowercase())
    }

    /// The identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&Address> for AccountId {
    fn from(address: &Address) -> Self {
        Self(address.to_hex())
    }
}

impl From<Address> for AccountId {
    fn from(address: Address) -> Self {
        Self(address.to_hex())
    }
}

impl From<&ChannelId> for AccountId {
    fn from(id: &ChannelId) -> Self {
        Self(id.to_hex())
    }
}

impl From<&SessionId> for AccountId {
    fn from(id: &SessionId) -> Self {
        Self(id.to_hex())
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A signed change of a raw on-chain amount, as carried by a resize event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawDelta {
    Increase(U256),
    Decrease(U256),
}

impl RawDelta {
    /// Unsigned magnitude of the change.
    pub fn magnitude(&self) -> U256 {
        match self {
            Self::Increase(v) | Self::Decrease(v) => *v,
        }
    }

    /// Whether the delta is zero in either direction.
    pub fn is_zero(&self) -> bool {
        self.magnitude().is_zero()
    }

    /// Apply the delta to a raw amount. Fails on underflow or overflow.
    pub fn apply(&self, base: U256) -> Result<U256, CoreError> {
        match self {
            Self::Increase(v) => base
                .checked_add(*v)
                .ok_or_else(|| CoreError::AmountOutOfRange(format!("{} + {}", base, v))),
            Self::Decrease(v) => base
                .checked_sub(*v)
                .ok_or_else(|| CoreError::AmountOutOfRange(format!("{} - {}", base, v))),
        }
    }

    /// Sum of two signed deltas. Fails on overflow.
    pub fn checked_add(&self, other: &RawDelta) -> Result<RawDelta, CoreError> {
        let overflow = || CoreError::AmountOutOfRange(format!("{:?} + {:?}", self, other));
        Ok(match (self, other) {
            (Self::Increase(a), Self::Increase(b)) => {
                Self::Increase(a.checked_add(*b).ok_or_else(overflow)?)
            }
            (Self::Decrease(a), Self::Decrease(b)) => {
                Self::Decrease(a.checked_add(*b).ok_or_else(overflow)?)
            }
            (Self::Increase(a), Self::Decrease(b)) | (Self::Decrease(b), Self::Increase(a)) => {
                if a >= b {
                    Self::Increase(*a - *b)
                } else {
                    Self::Decrease(*b - *a)
                }
            }
        })
    }

    /// Whether the value is strictly below zero.
    pub fn is_negative(&self) -> bool {
        matches!(self, Self::Decrease(v) if !v.is_zero())
    }

    /// Two's-complement 256-bit big-endian word, as an `int256` would be encoded on chain.
    pub fn to_word(&self) -> [u8; 32] {
        let value = match self {
            Self::Increase(v) => *v,
            Self::Decrease(v) => (!*v).overflowing_add(U256::one()).0,
        };
        let mut word = [0u8; 32];
        value.to_big_endian(&mut word);
        word
    }
}

impl FromStr for RawDelta {
    type Err = CoreError;

    /// Parse a signed base-10 integer such as `-1500` or `+20`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(CoreError::InvalidAmount(format!("not an integer: {:?}", s)));
        }
        let value = U256::from_dec_str(digits)
            .map_err(|e| CoreError::InvalidAmount(format!("{}: {:?}", s, e)))?;
        Ok(if negative {
            Self::Decrease(value)
        } else {
            Self::Increase(value)
        })
    }
}
