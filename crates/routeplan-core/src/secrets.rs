//! API key handling for provider credentials.
//!
//! Keys travel through the whole pipeline (config → table → external
//! executor), so they are wrapped as early as possible:
//!
//! - **No accidental logging**: `Debug`/`Display` print `[REDACTED]`
//! - **Memory safety**: values are zeroed on drop via `secrecy`
//! - **Explicit exposure**: `.expose()` is the only way to read the value
//!
//! Serialization is the one deliberate exception: the pipeline table is a
//! contract with the executor, which needs the raw key to authenticate.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single provider API key.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Wrap a raw key value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Expose the key value at the point of use.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Check if the key is empty.
    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    /// A short, log-safe hint: the last four characters, masked otherwise.
    pub fn hint(&self) -> String {
        let value = self.expose();
        let count = value.chars().count();
        if count <= 4 {
            return "****".to_string();
        }
        let tail: String = value.chars().skip(count - 4).collect();
        format!("****{}", tail)
    }
}

impl PartialEq for ApiKey {
    fn eq(&self, other: &Self) -> bool {
        self.expose() == other.expose()
    }
}

impl Eq for ApiKey {}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<&str> for ApiKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ApiKey {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl Serialize for ApiKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.expose())
    }
}

impl<'de> Deserialize<'de> for ApiKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_is_redacted() {
        let key = ApiKey::new("sk-very-secret-value");
        let debug = format!("{:?}", key);
        assert!(!debug.contains("sk-very-secret-value"));
        assert!(debug.contains("REDACTED"));
        assert_eq!(format!("{}", key), "[REDACTED]");
    }

    #[test]
    fn test_serialize_exposes_value() {
        let key = ApiKey::new("sk-abc");
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"sk-abc\"");

        let back: ApiKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_hint() {
        assert_eq!(ApiKey::new("sk-1234567890").hint(), "****7890");
        assert_eq!(ApiKey::new("abc").hint(), "****");
    }
}
