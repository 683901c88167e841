//! Secure credential handling using the secrecy crate
//!
//! Credentials such as the PostgreSQL connection string are held in
//! [`SecretString`]. The `secrecy` crate zeros memory when secrets are dropped
//! and redacts them from `Debug` output.
//!
//! # Example
//!
//! ```rust
//! use wardflow::config::secret_string;
//! use secrecy::ExposeSecret;
//!
//! let connection = secret_string("postgresql://user:pass@db/wardflow".to_string());
//!
//! // Access the secret (only when needed)
//! assert!(connection.expose_secret().starts_with("postgresql://"));
//!
//! // Debug output is redacted
//! assert!(!format!("{connection:?}").contains("pass"));
//! ```

use secrecy::{CloneableSecret, DebugSecret, Secret, SerializableSecret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Newtype wrapper for String that implements the required traits for Secret
#[derive(Clone, Debug, Zeroize, ZeroizeOnDrop)]
pub struct SecretValue(String);

impl CloneableSecret for SecretValue {}
impl DebugSecret for SecretValue {}
impl SerializableSecret for SecretValue {}

impl From<String> for SecretValue {
    fn from(s: String) -> Self {
        SecretValue(s)
    }
}

impl PartialEq<str> for SecretValue {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl AsRef<str> for SecretValue {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl SecretValue {
    /// Check if the secret value is empty
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Check if the secret value starts with a prefix
    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }

    /// Parse the secret value into another type
    pub fn parse<F: std::str::FromStr>(&self) -> Result<F, F::Err> {
        self.0.parse()
    }
}

impl Serialize for SecretValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SecretValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).map(SecretValue)
    }
}

/// Type alias for a secret string
pub type SecretString = Secret<SecretValue>;

/// Wraps a String in a [`SecretString`]
#[inline]
pub fn secret_string(value: String) -> SecretString {
    Secret::new(SecretValue::from(value))
}

/// Redacts the credentials part of a connection URL for display
///
/// ```rust
/// use wardflow::config::secret::redact_connection_string;
///
/// assert_eq!(
///     redact_connection_string("postgresql://ward:hunter2@db:5432/wardflow"),
///     "postgresql://***@db:5432/wardflow"
/// );
/// ```
pub fn redact_connection_string(connection_string: &str) -> String {
    let scheme = connection_string
        .split_once("://")
        .map(|(scheme, _)| scheme)
        .unwrap_or("postgresql");
    match connection_string.rsplit_once('@') {
        Some((_, host)) => format!("{scheme}://***@{host}"),
        None => format!("{scheme}://***"),
    }
}
