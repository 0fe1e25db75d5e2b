//! Common types and serde helpers for the Proxmox API.
//!
//! Proxmox wraps every payload in `{"data": ...}` and is loose about scalar
//! types: numbers may arrive as strings and booleans as 0/1 depending on the
//! endpoint and cluster version.

use serde::Deserialize;

/// The `{"data": ...}` envelope around every Proxmox response.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[derive(Debug, Clone, Default)]
pub struct ApiQueryParams {
    params: Vec<(String, String)>,
}

impl ApiQueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<K: Into<String>, V: ToString>(mut self, key: K, value: V) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    pub fn add_optional<K: Into<String>, V: ToString>(mut self, key: K, value: Option<V>) -> Self {
        if let Some(v) = value {
            self.params.push((key.into(), v.to_string()));
        }
        self
    }

    pub fn to_query_string(&self) -> String {
        if self.params.is_empty() {
            String::new()
        } else {
            format!(
                "?{}",
                self.params
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
                    .collect::<Vec<_>>()
                    .join("&")
            )
        }
    }
}

pub mod string_or_u64 {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum StringOrU64 {
            String(String),
            U64(u64),
        }

        match Option::<StringOrU64>::deserialize(deserializer)? {
            Some(StringOrU64::String(s)) => {
                s.parse::<u64>().map(Some).map_err(serde::de::Error::custom)
            }
            Some(StringOrU64::U64(u)) => Ok(Some(u)),
            None => Ok(None),
        }
    }
}

pub mod string_or_u32 {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum StringOrU32 {
            String(String),
            U32(u32),
        }

        match Option::<StringOrU32>::deserialize(deserializer)? {
            Some(StringOrU32::String(s)) => {
                s.parse::<u32>().map(Some).map_err(serde::de::Error::custom)
            }
            Some(StringOrU32::U32(u)) => Ok(Some(u)),
            None => Ok(None),
        }
    }
}

pub mod int_bool {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum BoolOrInt {
            Bool(bool),
            Int(u8),
        }

        Ok(match Option::<BoolOrInt>::deserialize(deserializer)? {
            Some(BoolOrInt::Bool(b)) => Some(b),
            Some(BoolOrInt::Int(i)) => Some(i != 0),
            None => None,
        })
    }
}
