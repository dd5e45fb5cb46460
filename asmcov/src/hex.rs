// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::binary::Address;

/// Address serialized as a bare lowercase hex string, e.g. `"401000"`.
///
/// Usable as a JSON object key.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Hex(#[serde(with = "self")] pub u64);

impl From<Address> for Hex {
    fn from(addr: Address) -> Self {
        Hex(addr.0)
    }
}

impl From<Hex> for Address {
    fn from(hex: Hex) -> Self {
        Address(hex.0)
    }
}

pub fn serialize<S>(val: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let s = format!("{val:x}");
    serializer.serialize_str(&s)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;

    // Only the form written by `serialize`, so that every address has
    // exactly one spelling.
    let canonical = !s.is_empty()
        && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        && (s == "0" || !s.starts_with('0'));

    if !canonical {
        return Err(serde::de::Error::custom(format!(
            "non-canonical hex address: {s:?}"
        )));
    }

    u64::from_str_radix(&s, 16).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use anyhow::Result;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_hex_map_keys() -> Result<()> {
        let mut map = BTreeMap::new();
        map.insert(Hex(0x401000), 2u64);
        map.insert(Hex(0x10), 1u64);

        let text = serde_json::to_string(&map)?;
        assert_eq!(text, r#"{"10":1,"401000":2}"#);

        let parsed: BTreeMap<Hex, u64> = serde_json::from_str(&text)?;
        assert_eq!(parsed, map);

        Ok(())
    }

    #[test]
    fn test_hex_zero() -> Result<()> {
        let hex: Hex = serde_json::from_str(r#""0""#)?;
        assert_eq!(hex, Hex(0));
        assert_eq!(serde_json::to_string(&hex)?, r#""0""#);

        Ok(())
    }

    #[test]
    fn test_hex_rejects_non_canonical() {
        for text in [r#""0x10""#, r#""010""#, r#""+10""#, r#""1A""#, r#"" 10""#] {
            assert!(serde_json::from_str::<Hex>(text).is_err(), "{text}");
        }
    }

    #[test]
    fn test_hex_rejects_garbage() {
        assert!(serde_json::from_str::<Hex>(r#""zz""#).is_err());
        assert!(serde_json::from_str::<Hex>(r#""""#).is_err());
        assert!(serde_json::from_str::<Hex>(r#""0x""#).is_err());
        assert!(serde_json::from_str::<Hex>("4096").is_err());
    }
}
