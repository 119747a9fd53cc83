use crate::{Error, Result};
use serde::de::{Deserializer, Error as _};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

pub const DEFAULT_KEY_PREFIX: &str = "ndjson_task";
pub const DEFAULT_LIST_PREFIX: &str = "ndjson_list";

/// Naming scheme for the two store keys owned by a task.
///
/// A task with id `ID` lives at `{key_prefix}_ID` (metadata record) and
/// `{list_prefix}_ID` (output list).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyScheme {
    key_prefix: String,
    list_prefix: String,
}

impl Default for KeyScheme {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            list_prefix: DEFAULT_LIST_PREFIX.to_string(),
        }
    }
}

impl KeyScheme {
    /// Builds a scheme, rejecting empty or identical prefixes since either
    /// would let metadata and output keys collide.
    pub fn new(key_prefix: impl Into<String>, list_prefix: impl Into<String>) -> Result<Self> {
        let key_prefix = key_prefix.into();
        let list_prefix = list_prefix.into();
        if key_prefix.is_empty() || list_prefix.is_empty() {
            return Err(Error::InvalidConfig {
                reason: "key and list prefixes must not be empty".to_string(),
            });
        }
        if key_prefix == list_prefix {
            return Err(Error::InvalidConfig {
                reason: format!("key and list prefixes must differ (both are `{key_prefix}`)"),
            });
        }
        Ok(Self {
            key_prefix,
            list_prefix,
        })
    }

    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    pub fn list_prefix(&self) -> &str {
        &self.list_prefix
    }

    pub fn keys_for(&self, id: &str) -> TaskKeys {
        TaskKeys {
            id: id.to_string(),
            metadata_key: format!("{}_{id}", self.key_prefix),
            output_key: format!("{}_{id}", self.list_prefix),
        }
    }
}

/// The identity of one task: its id and the two keys derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskKeys {
    pub id: String,
    pub metadata_key: String,
    pub output_key: String,
}

/// Request headers in arrival order.
///
/// Serialized as a JSON object. Repeated names collapse into one entry whose
/// values are joined with `", "`, the same folding HTTP allows for
/// list-valued headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders(Vec<(String, String)>);

impl RequestHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Returns the folded value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self
            .0
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect();
        (!values.is_empty()).then(|| values.join(", "))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    // Folds duplicates while keeping first-seen order.
    fn folded(&self) -> Vec<(&str, String)> {
        let mut folded: Vec<(&str, String)> = Vec::with_capacity(self.0.len());
        for (name, value) in &self.0 {
            match folded.iter_mut().find(|(n, _)| *n == name.as_str()) {
                Some((_, joined)) => {
                    joined.push_str(", ");
                    joined.push_str(value);
                }
                None => folded.push((name.as_str(), value.clone())),
            }
        }
        folded
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for RequestHeaders {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        )
    }
}

impl Serialize for RequestHeaders {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        let folded = self.folded();
        let mut map = serializer.serialize_map(Some(folded.len()))?;
        for (name, value) in &folded {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RequestHeaders {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        let map = serde_json::Map::<String, serde_json::Value>::deserialize(deserializer)?;
        map.into_iter()
            .map(|(name, value)| match value {
                serde_json::Value::String(s) => Ok((name, s)),
                other => Err(D::Error::custom(format!(
                    "header `{name}` must be a string, got {other}"
                ))),
            })
            .collect()
    }
}

/// The metadata record stored at a task's metadata key.
///
/// Field names are part of the producer contract; producers in any language
/// read this JSON to find the output list and the original request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    #[serde(rename = "uuid")]
    pub id: String,
    #[serde(rename = "task_key")]
    pub metadata_key: String,
    #[serde(rename = "task_list")]
    pub output_key: String,
    /// Seconds since the Unix epoch, with sub-second precision.
    pub request_time: f64,
    #[serde(default)]
    pub headers: RequestHeaders,
    #[serde(default)]
    pub body: String,
}

impl TaskRecord {
    pub fn new(keys: &TaskKeys, headers: RequestHeaders, body: String) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: keys.id.clone(),
            metadata_key: keys.metadata_key.clone(),
            output_key: keys.output_key.clone(),
            request_time: now.timestamp_micros() as f64 / 1_000_000.0,
            headers,
            body,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|source| Error::MalformedRecord {
            key: self.metadata_key.clone(),
            source,
        })
    }

    /// Decodes the record read from `key`.
    pub fn from_json(key: &str, raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|source| Error::MalformedRecord {
            key: key.to_string(),
            source,
        })
    }

    pub fn keys(&self) -> TaskKeys {
        TaskKeys {
            id: self.id.clone(),
            metadata_key: self.metadata_key.clone(),
            output_key: self.output_key.clone(),
        }
    }
}
