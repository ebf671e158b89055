//! Keyed deterministic value transforms
//!
//! Every function here is pure: the output depends only on the input and the secret. No
//! clock, no randomness and no mapping table are involved, so two runs with the same secret
//! produce byte-identical output on any machine.

use crate::domain::{DbmaskError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Minimum secret length, in characters
pub const MIN_SECRET_LEN: usize = 32;

const FIRST_NAMES: [&str; 6] = ["Amit", "Priya", "Raj", "Anjali", "Vikram", "Neha"];
const LAST_NAMES: [&str; 6] = ["Kumar", "Sharma", "Singh", "Patel", "Gupta", "Reddy"];

const DEFAULT_SHOW_LAST: usize = 4;
const DEFAULT_MASK_CHAR: char = 'X';
const YEAR_MASK: &str = "****";

/// Granularity kept by [`DeterministicTransformer::generalize_date`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DatePrecision {
    /// `YYYY`
    #[default]
    Year,
    /// `YYYY-MM`
    Month,
}

/// HMAC-SHA256 based transformer
///
/// # Examples
///
/// ```
/// use dbmask::anonymization::DeterministicTransformer;
///
/// let t = DeterministicTransformer::new("test-secret-key-32-characters-long-123456")?;
/// assert_eq!(t.hash_id("12345"), t.hash_id("12345"));
/// assert_eq!(t.mask_phone("9876543210"), "XXXXXX3210");
/// assert_eq!(t.generalize_date("1985-05-15"), "1985");
/// # Ok::<(), dbmask::domain::DbmaskError>(())
/// ```
#[derive(Clone)]
pub struct DeterministicTransformer {
    mac: HmacSha256,
}

impl std::fmt::Debug for DeterministicTransformer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeterministicTransformer")
            .field("mac", &"[REDACTED]")
            .finish()
    }
}

impl DeterministicTransformer {
    /// Key a transformer with `secret`
    ///
    /// # Errors
    ///
    /// Returns [`DbmaskError::Configuration`] if the secret is shorter than 32 characters.
    pub fn new(secret: &str) -> Result<Self> {
        if secret.chars().count() < MIN_SECRET_LEN {
            return Err(DbmaskError::Configuration(format!(
                "Anonymization secret must be at least {MIN_SECRET_LEN} characters"
            )));
        }

        let mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| DbmaskError::Configuration(format!("Invalid HMAC key: {e}")))?;

        Ok(Self { mac })
    }

    fn digest(&self, value: &str) -> [u8; 32] {
        let mut mac = self.mac.clone();
        mac.update(value.as_bytes());
        let mut out = [0u8; 32];
        out.copy_from_slice(&mac.finalize().into_bytes());
        out
    }

    /// Lowercase hex HMAC-SHA256 of `value` (64 chars)
    pub fn hash_id(&self, value: &str) -> String {
        self.digest(value)
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// Deterministic "First Last" name drawn from two fixed pools
    ///
    /// The pools are small, so distinct inputs collide often. Linkability within a dataset
    /// is preserved, uniqueness is not.
    pub fn fake_name(&self, value: &str) -> String {
        let digest = self.digest(value);
        let mut seed_bytes = [0u8; 8];
        seed_bytes.copy_from_slice(&digest[..8]);
        let seed = u64::from_be_bytes(seed_bytes);

        let first = FIRST_NAMES[(seed % FIRST_NAMES.len() as u64) as usize];
        let last = LAST_NAMES[((seed / 10) % LAST_NAMES.len() as u64) as usize];
        format!("{first} {last}")
    }

    /// Keep the last four characters, mask the rest with `X`
    pub fn mask_phone(&self, value: &str) -> String {
        mask_keep_last(value, DEFAULT_SHOW_LAST, DEFAULT_MASK_CHAR)
    }

    /// Reduce a date to its year
    pub fn generalize_date(&self, value: &str) -> String {
        generalize(value, DatePrecision::Year)
    }

    /// Reduce a date to the requested precision
    pub fn generalize_date_to(&self, value: &str, precision: DatePrecision) -> String {
        generalize(value, precision)
    }
}

/// Replace all but the last `show_last` characters with `mask_char`
///
/// Values shorter than `show_last` become `show_last` mask characters, so the original
/// length of short values is not revealed.
pub fn mask_keep_last(value: &str, show_last: usize, mask_char: char) -> String {
    let len = value.chars().count();
    if len < show_last {
        return std::iter::repeat(mask_char).take(show_last).collect();
    }

    let masked = len - show_last;
    value
        .chars()
        .enumerate()
        .map(|(i, c)| if i < masked { mask_char } else { c })
        .collect()
}

fn generalize(value: &str, precision: DatePrecision) -> String {
    let chars: Vec<char> = value.chars().take(7).collect();
    let year_ok = chars.len() >= 4 && chars[..4].iter().all(char::is_ascii_digit);
    if !year_ok {
        return YEAR_MASK.to_string();
    }

    match precision {
        DatePrecision::Year => chars[..4].iter().collect(),
        DatePrecision::Month => {
            let month_ok = chars.len() == 7
                && chars[4] == '-'
                && chars[5].is_ascii_digit()
                && chars[6].is_ascii_digit();
            if month_ok {
                chars.iter().collect()
            } else {
                YEAR_MASK.to_string()
            }
        }
    }
}
