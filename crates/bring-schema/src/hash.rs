//! Content digests and structural hashing.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Length of the hex prefix used for identifiers derived from structural hashes.
pub const ID_HEX_LEN: usize = 32;

/// A validated SHA256 content digest (64 lowercase hex characters).
///
/// Used for installed file fingerprints in the target registry, so that
/// invalid strings in a hand-edited registry are rejected at load time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Create a new `ContentHash`, validating the input.
    ///
    /// Accepts strings with or without a `sha256:` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error string if the hex portion is not exactly 64 ASCII hex characters.
    pub fn new(s: impl Into<String>) -> Result<Self, String> {
        let s = s.into();
        let hex = s.strip_prefix("sha256:").unwrap_or(&s);
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!(
                "Invalid SHA256 digest: expected 64 hex chars, got '{s}'"
            ));
        }
        Ok(Self(hex.to_lowercase()))
    }

    /// Hash an in-memory buffer.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Hash a file by streaming its contents.
    ///
    /// # Errors
    ///
    /// Returns any I/O error raised while opening or reading the file.
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        let mut file = std::fs::File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Return the inner hex string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// BLAKE3 hash of a JSON value in canonical form, as lowercase hex.
///
/// Object keys are sorted at every level, so authoring order never changes the hash.
pub fn canonical_hash(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    blake3::hash(out.as_bytes()).to_hex().to_string()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

/// Derive a stable, filesystem-safe identifier `<prefix>-<hex>` from a JSON value.
pub fn derive_id(prefix: &str, value: &Value) -> String {
    let hash = canonical_hash(value);
    format!("{prefix}-{}", &hash[..ID_HEX_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_content_hash_validation() {
        let valid = "a".repeat(64);
        assert!(ContentHash::new(&valid).is_ok());
        assert!(ContentHash::new(format!("sha256:{valid}")).is_ok());
        assert!(ContentHash::new("abc").is_err());
        assert!(ContentHash::new("z".repeat(64)).is_err());
    }

    #[test]
    fn test_content_hash_file_matches_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello bring").unwrap();
        let from_file = ContentHash::of_file(file.path()).unwrap();
        assert_eq!(from_file, ContentHash::of_bytes(b"hello bring"));
    }

    #[test]
    fn test_content_hash_rejects_invalid_on_deserialize() {
        let bad: Result<ContentHash, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_derive_id_is_stable_and_prefixed() {
        let a = derive_id("git", &json!({"url": "u", "b": 1}));
        let b = derive_id("git", &json!({"b": 1, "url": "u"}));
        assert_eq!(a, b);
        assert!(a.starts_with("git-"));
        assert_eq!(a.len(), 4 + ID_HEX_LEN);
    }
}
