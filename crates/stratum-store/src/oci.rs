use crate::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
pub const MEDIA_TYPE_OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

/// A content-addressable reference to a blob.
///
/// `digest` and `size` must always match the SHA-256 hash and byte length of
/// the referenced blob. Keys other than the three required ones (`platform`,
/// `annotations`, `urls`, ...) are carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Descriptor {
    pub fn new(media_type: &str, digest: impl Into<String>, size: u64) -> Self {
        Self {
            media_type: media_type.to_owned(),
            digest: digest.into(),
            size,
            extra: Map::new(),
        }
    }

    /// Point this descriptor at new content, keeping media type and extra keys.
    pub fn relink(&mut self, digest: impl Into<String>, size: u64) {
        self.digest = digest.into();
        self.size = size;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageManifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageIndex {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default)]
    pub manifests: Vec<Descriptor>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Image runtime configuration, kept as an open JSON object so that
/// unknown keys survive a rewrite.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ImageConfig(pub Map<String, Value>);

impl ImageConfig {
    /// Shallow merge: overwrites the value for `key` only.
    pub fn merge(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_owned(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn architecture(&self) -> Option<&str> {
        self.get("architecture").and_then(Value::as_str)
    }

    pub fn variant(&self) -> Option<&str> {
        self.get("variant").and_then(Value::as_str)
    }
}

/// Serialize to the canonical byte form used for digests: compact JSON with
/// every object's keys in sorted order.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    // Round-tripping through `Value` sorts struct fields and flattened
    // extras together.
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&value)?)
}

/// `sha256:<lowercase hex>` of `data`.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(data))
}

/// Split `<algorithm>:<hex>` into its two parts.
pub fn split_digest(digest: &str) -> Result<(&str, &str), StoreError> {
    let (algo, hex) = digest
        .split_once(':')
        .ok_or_else(|| StoreError::InvalidDigest(digest.to_owned()))?;
    let algo_ok = !algo.is_empty()
        && algo
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+._-".contains(c));
    let hex_ok = !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
    if !algo_ok || !hex_ok {
        return Err(StoreError::InvalidDigest(digest.to_owned()));
    }
    Ok((algo, hex))
}
