//! Serde adapters for big integers inside instruction payloads
//!
//! Big values cross the wire as decimal strings: human-auditable, stable
//! across library versions, and safe for JSON consumers that would mangle
//! integers above 2^53.

use std::collections::BTreeMap;

use num_bigint::BigUint;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serializer};

pub mod biguint {
    use super::*;

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse()
            .map_err(|_| D::Error::custom(format!("invalid big integer '{raw}'")))
    }
}

pub mod biguint_map {
    use super::*;
    use serde::Serialize;

    pub fn serialize<K, S>(value: &BTreeMap<K, BigUint>, serializer: S) -> Result<S::Ok, S::Error>
    where
        K: Serialize + Ord,
        S: Serializer,
    {
        let shadow: BTreeMap<&K, String> = value.iter().map(|(k, v)| (k, v.to_string())).collect();
        shadow.serialize(serializer)
    }

    pub fn deserialize<'de, K, D>(deserializer: D) -> Result<BTreeMap<K, BigUint>, D::Error>
    where
        K: Deserialize<'de> + Ord,
        D: Deserializer<'de>,
    {
        let shadow = BTreeMap::<K, String>::deserialize(deserializer)?;
        shadow
            .into_iter()
            .map(|(k, raw)| {
                let parsed = raw
                    .parse()
                    .map_err(|_| D::Error::custom(format!("invalid big integer '{raw}'")))?;
                Ok((k, parsed))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;
    use sharddex_types::TokenId;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Wrapper {
        #[serde(with = "crate::serde_big::biguint")]
        value: BigUint,
        #[serde(with = "crate::serde_big::biguint_map")]
        per_token: BTreeMap<TokenId, BigUint>,
    }

    #[test]
    fn decimal_string_round_trip() {
        let mut per_token = BTreeMap::new();
        per_token.insert(TokenId::from_tag("abc"), BigUint::from(7u64).pow(40));
        let w = Wrapper { value: BigUint::from(2u64).pow(100), per_token };
        let json = serde_json::to_string(&w).unwrap();
        assert!(json.contains(&BigUint::from(2u64).pow(100).to_string()));
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back, w);
    }

    #[test]
    fn rejects_garbage() {
        let bad = r#"{"value":"12x","per_token":{}}"#;
        assert!(serde_json::from_str::<Wrapper>(bad).is_err());
    }
}
