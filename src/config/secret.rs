//! Secret values
//!
//! Database passwords, the approval flag and the anonymization key are held as
//! [`SecretString`]. The buffer is zeroized on drop and `Debug` prints a placeholder, so a
//! config dumped with `{:?}` never shows them.
//!
//! # Properties
//!
//! - **Zeroization**: the backing `String` is wiped when the last copy is dropped
//! - **Redacted Debug**: both [`SecretValue`] and `Secret<SecretValue>` print placeholders
//! - **Explicit access**: reading the value needs `expose_secret()`
//! - **Serde**: deserializes from a plain TOML string, so `${VAR}` expansion still applies
//!
//! # Example
//!
//! ```rust
//! use dbmask::config::{secret_string, SecretString};
//! use secrecy::ExposeSecret;
//!
//! let flag: SecretString = secret_string("approve-uat-refresh".to_string());
//! assert_eq!(flag.expose_secret().as_ref(), "approve-uat-refresh");
//! assert!(!format!("{flag:?}").contains("approve"));
//! ```

use secrecy::{CloneableSecret, DebugSecret, Secret, SerializableSecret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// Zeroizing string payload for [`SecretString`]
#[derive(Clone, Default, Zeroize)]
#[zeroize(drop)]
pub struct SecretValue(String);

impl CloneableSecret for SecretValue {}
impl DebugSecret for SecretValue {}
impl SerializableSecret for SecretValue {}

impl std::fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecretValue {
    fn from(s: String) -> Self {
        SecretValue(s)
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
}

impl Serialize for SecretValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SecretValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(SecretValue)
    }
}

/// Password, approval flag or anonymization key
///
/// Serializes to the plaintext, since [`SecretValue`] opts in to `SerializableSecret`.
pub type SecretString = Secret<SecretValue>;

/// Wrap a plaintext value
///
/// # Arguments
///
/// * `value` - The plaintext; it is moved in and never copied out of the secret
///
/// # Example
///
/// ```rust
/// use dbmask::config::secret_string;
/// use secrecy::ExposeSecret;
///
/// let key = secret_string("k3y".to_string());
/// assert!(!key.expose_secret().is_empty());
/// ```
#[inline]
pub fn secret_string(value: String) -> SecretString {
    Secret::new(SecretValue::from(value))
}

/// Wrap an optional value, e.g. an environment variable that may be unset
#[inline]
pub fn secret_string_opt(value: Option<String>) -> Option<SecretString> {
    value.map(secret_string)
}
