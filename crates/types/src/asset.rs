use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of an asset ticker.
pub const MAX_TICKER_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssetIdError {
    #[error("asset ticker must be 1..={MAX_TICKER_LEN} characters, got {0}")]
    InvalidLength(usize),
    #[error("asset ticker contains invalid character {0:?}")]
    InvalidCharacter(char),
}

/// Ticker of a fungible asset known to the asset service (`USDT`, `LP1`, ...).
///
/// Tickers are normalised to upper case.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetId(String);

impl AssetId {
    pub fn new(ticker: &str) -> Result<Self, AssetIdError> {
        let ticker = ticker.trim().to_ascii_uppercase();
        if ticker.is_empty() || ticker.len() > MAX_TICKER_LEN {
            return Err(AssetIdError::InvalidLength(ticker.len()));
        }
        if let Some(c) = ticker
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(AssetIdError::InvalidCharacter(c));
        }
        Ok(AssetId(ticker))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetId({})", self.0)
    }
}

impl FromStr for AssetId {
    type Err = AssetIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AssetId::new(s)
    }
}

impl TryFrom<String> for AssetId {
    type Error = AssetIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AssetId::new(&value)
    }
}

impl From<AssetId> for String {
    fn from(value: AssetId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tickers_are_upper_cased() {
        assert_eq!(AssetId::new("lp1").unwrap().as_str(), "LP1");
    }

    #[test]
    fn rejects_bad_tickers() {
        assert_eq!(AssetId::new(""), Err(AssetIdError::InvalidLength(0)));
        assert_eq!(
            AssetId::new("USD T"),
            Err(AssetIdError::InvalidCharacter(' '))
        );
        assert!(AssetId::new(&"A".repeat(MAX_TICKER_LEN + 1)).is_err());
    }
}
