// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::binary::{Address, BinaryCoverage, Count};
use crate::hex::Hex;

/// Identity of the binary a store belongs to.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ProgramJson {
    /// Lowercase hex SHA-256 of the executable file.
    pub sha256: String,

    /// Path of the executable when the store was last written. Informational.
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "version")]
pub enum StoreJson {
    #[serde(rename = "1")]
    V1(StoreJsonV1),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct StoreJsonV1 {
    pub program: ProgramJson,

    #[serde(deserialize_with = "deserialize_hits")]
    pub hits: BTreeMap<Hex, u64>,
}

/// Like the derived map deserializer, but a repeated address is an error
/// instead of silently replacing the earlier count.
fn deserialize_hits<'de, D>(deserializer: D) -> Result<BTreeMap<Hex, u64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct HitsVisitor;

    impl<'de> Visitor<'de> for HitsVisitor {
        type Value = BTreeMap<Hex, u64>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map from hex addresses to hit counts")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut hits = BTreeMap::new();

            while let Some((addr, count)) = map.next_entry::<Hex, u64>()? {
                if hits.insert(addr, count).is_some() {
                    return Err(de::Error::custom(format!(
                        "duplicate address: {:x}",
                        addr.0
                    )));
                }
            }

            Ok(hits)
        }
    }

    deserializer.deserialize_map(HitsVisitor)
}

impl StoreJson {
    pub fn new(program: ProgramJson, coverage: &BinaryCoverage) -> Self {
        let hits = coverage
            .as_ref()
            .iter()
            .map(|(addr, count)| (Hex::from(*addr), count.0))
            .collect();

        StoreJson::V1(StoreJsonV1 { program, hits })
    }

    pub fn deserialize(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    pub fn serialize(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
    }

    pub fn into_parts(self) -> (ProgramJson, BinaryCoverage) {
        match self {
            StoreJson::V1(v1) => {
                let coverage = v1
                    .hits
                    .into_iter()
                    .map(|(hex, count)| (Address::from(hex), Count(count)))
                    .collect();

                (v1.program, coverage)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use pretty_assertions::assert_eq;

    use super::*;

    const EXPECTED: &str = r#"
{
  "version": "1",
  "program": {
    "sha256": "00ff",
    "path": "/bin/target"
  },
  "hits": {
    "2000": 5,
    "2004": 5,
    "401000": 1
  }
}
"#;

    fn program() -> ProgramJson {
        ProgramJson {
            sha256: "00ff".into(),
            path: "/bin/target".into(),
        }
    }

    #[test]
    fn test_serialize() -> Result<()> {
        let coverage: BinaryCoverage = vec![
            (Address(0x401000), Count(1)),
            (Address(0x2004), Count(5)),
            (Address(0x2000), Count(5)),
        ]
        .into_iter()
        .collect();

        let json = StoreJson::new(program(), &coverage);
        let text = String::from_utf8(json.serialize()?)?;

        assert_eq!(text.trim(), EXPECTED.trim());

        Ok(())
    }

    #[test]
    fn test_deserialize() -> Result<()> {
        let json = StoreJson::deserialize(EXPECTED.as_bytes())?;
        let (program, coverage) = json.into_parts();

        assert_eq!(program.sha256, "00ff");
        assert_eq!(
            coverage.export(),
            vec![
                (Address(0x2000), Count(5)),
                (Address(0x2004), Count(5)),
                (Address(0x401000), Count(1)),
            ]
        );

        Ok(())
    }

    #[test]
    fn test_unknown_version() {
        let text = r#"{ "version": "7", "program": { "sha256": "", "path": "" }, "hits": {} }"#;
        assert!(StoreJson::deserialize(text.as_bytes()).is_err());
    }

    #[test]
    fn test_duplicate_address() {
        let text = r#"{ "version": "1", "program": { "sha256": "", "path": "" }, "hits": { "10": 1, "10": 5 } }"#;
        let err = StoreJson::deserialize(text.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("duplicate address: 10"));
    }

    #[test]
    fn test_bad_count() {
        let text = r#"{ "version": "1", "program": { "sha256": "", "path": "" }, "hits": { "10": -1 } }"#;
        assert!(StoreJson::deserialize(text.as_bytes()).is_err());
    }
}
