//! Symbol Key Normalization
//!
//! Canonicalizes free-form trading symbols into the key used to address
//! upstream streams and cached prices. Two spellings of the same pair
//! (`"BTCUSDT"`, `"btc-usdt"`, `"BTC/USDT"`) map to one key.

use std::fmt;

use serde::Serialize;

/// Maximum length of a normalized key.
pub const MAX_KEY_LEN: usize = 32;

/// Characters dropped while normalizing.
const SEPARATORS: &[char] = &['-', '/', '_', '.', ':'];

/// Canonical lowercase alphanumeric symbol key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SymbolKey(String);

impl SymbolKey {
    /// Normalize a free-form symbol.
    ///
    /// # Errors
    ///
    /// Returns [`SymbolError::InvalidSymbol`] if the input is empty, has no
    /// alphanumeric characters, contains anything other than alphanumerics
    /// and separators, or normalizes to more than [`MAX_KEY_LEN`] characters.
    pub fn parse(raw: &str) -> Result<Self, SymbolError> {
        let mut key = String::with_capacity(raw.len());

        for c in raw.trim().chars() {
            if c.is_ascii_alphanumeric() {
                key.push(c.to_ascii_lowercase());
            } else if !(SEPARATORS.contains(&c) || c.is_whitespace()) {
                return Err(SymbolError::InvalidSymbol(raw.to_string()));
            }
        }

        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(SymbolError::InvalidSymbol(raw.to_string()));
        }

        Ok(Self(key))
    }

    /// Borrow the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SymbolKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for SymbolKey {
    type Error = SymbolError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

/// Symbol normalization errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// The input cannot be turned into a symbol key.
    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),
}
