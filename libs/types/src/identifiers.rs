//! Typed identifiers for exchange state
//!
//! Every aggregate in the trading core is addressed by one of these newtypes.
//! The 32-byte hash identifiers serialize as lowercase hex strings so they can
//! double as JSON map keys inside instruction payloads.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::IdentifierError;

/// Length in bytes of the hash-shaped identifiers (token, access, tx).
pub const ID_LENGTH: usize = 32;

macro_rules! hash_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub [u8; ID_LENGTH]);

        impl $name {
            /// Identifier with every byte zero.
            pub const fn zero() -> Self {
                Self([0u8; ID_LENGTH])
            }

            pub fn is_zero(&self) -> bool {
                self.0.iter().all(|b| *b == 0)
            }

            pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
                &self.0
            }

            /// Build an identifier from a short ASCII tag, zero padded.
            /// Intended for tests and fixtures.
            pub fn from_tag(tag: &str) -> Self {
                let mut bytes = [0u8; ID_LENGTH];
                let src = tag.as_bytes();
                let n = src.len().min(ID_LENGTH);
                bytes[..n].copy_from_slice(&src[..n]);
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = IdentifierError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let raw = hex::decode(s).map_err(|_| IdentifierError::InvalidHex {
                    input: s.to_string(),
                })?;
                if raw.len() != ID_LENGTH {
                    return Err(IdentifierError::InvalidLength {
                        expected: ID_LENGTH,
                        actual: raw.len(),
                    });
                }
                let mut bytes = [0u8; ID_LENGTH];
                bytes.copy_from_slice(&raw);
                Ok(Self(bytes))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(D::Error::custom)
            }
        }
    };
}

hash_id! {
    /// Canonical token identifier. Lexicographic byte order doubles as the
    /// canonical token ordering inside a pair (`token0 < token1`).
    TokenId
}

hash_id! {
    /// Identity of a liquidity provider, order owner or staker - the id of
    /// the access NFT minted for them.
    AccessId
}

hash_id! {
    /// Hash of the user transaction that carried a request.
    TxId
}

impl TokenId {
    /// The chain's native coin. Trading fees may optionally be paid in it and
    /// staking rewards denominated in it.
    pub const fn native() -> Self {
        Self::zero()
    }
}

impl AccessId {
    /// Access identity granted for a mint request: the requesting tx hash
    /// reused verbatim, which is already unique per chain history.
    pub fn derive(tx_id: &TxId) -> Self {
        Self(tx_id.0)
    }
}

/// Identifier of one trading pair's pool. Derived from the canonical token
/// pair plus the hash of the transaction that initiated the pool, so two
/// pools over the same pair remain distinct.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolPairId(pub String);

impl PoolPairId {
    pub fn derive(token0: &TokenId, token1: &TokenId, init_tx: &TxId) -> Self {
        Self(format!("{}-{}-{}", token0, token1, init_tx))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PoolPairId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PoolPairId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a resting limit order: the hash of the tx that placed it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn derive(tx_id: &TxId) -> Self {
        Self(tx_id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Canonically ordered token pair. `new` sorts its arguments so that
/// `token0 < token1` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PairKey {
    pub token0: TokenId,
    pub token1: TokenId,
}

impl PairKey {
    pub fn new(a: TokenId, b: TokenId) -> Self {
        if a <= b {
            Self { token0: a, token1: b }
        } else {
            Self { token0: b, token1: a }
        }
    }

    pub fn contains(&self, token: &TokenId) -> bool {
        self.token0 == *token || self.token1 == *token
    }

    /// The pair member that is not `token`, if `token` belongs to the pair.
    pub fn counterpart(&self, token: &TokenId) -> Option<TokenId> {
        if self.token0 == *token {
            Some(self.token1)
        } else if self.token1 == *token {
            Some(self.token0)
        } else {
            None
        }
    }
}

/// Composite key for legacy (V1) share records: ordered pair + contributor
/// address. Replaces the old `"tokenA-tokenB-address"` string concatenation,
/// which was vulnerable to prefix collisions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShareKey {
    pub pair: PairKey,
    pub contributor: String,
}

impl ShareKey {
    pub fn new(pair: PairKey, contributor: impl Into<String>) -> Self {
        Self { pair, contributor: contributor.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_id_hex_round_trip() {
        let id = TokenId::from_tag("usdt");
        let encoded = id.to_string();
        assert_eq!(encoded.len(), ID_LENGTH * 2);
        let decoded: TokenId = encoded.parse().unwrap();
        assert_eq!(decoded, id);
    }

    #[test]
    fn token_id_rejects_bad_input() {
        assert!(TokenId::from_str("zz").is_err());
        assert!(TokenId::from_str("abcd").is_err()); // too short
    }

    #[test]
    fn pair_key_is_canonical() {
        let a = TokenId::from_tag("aaa");
        let b = TokenId::from_tag("bbb");
        assert_eq!(PairKey::new(a, b), PairKey::new(b, a));
        assert!(PairKey::new(b, a).token0 < PairKey::new(b, a).token1);
    }

    #[test]
    fn pair_key_counterpart() {
        let a = TokenId::from_tag("aaa");
        let b = TokenId::from_tag("bbb");
        let pair = PairKey::new(a, b);
        assert_eq!(pair.counterpart(&a), Some(b));
        assert_eq!(pair.counterpart(&b), Some(a));
        assert_eq!(pair.counterpart(&TokenId::from_tag("ccc")), None);
    }

    #[test]
    fn ids_serialize_as_json_strings() {
        let id = AccessId::from_tag("maker-1");
        let json = serde_json::to_string(&id).unwrap();
        assert!(json.starts_with('"'));
        let back: AccessId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn share_keys_do_not_prefix_collide() {
        // "ab"+"c" and "a"+"bc" collide under naive string concatenation but
        // not under the composite key.
        let t = TokenId::from_tag("t");
        let u = TokenId::from_tag("u");
        let k1 = ShareKey::new(PairKey::new(t, u), "abc");
        let k2 = ShareKey::new(PairKey::new(t, u), "ab");
        assert_ne!(k1, k2);
    }
}
