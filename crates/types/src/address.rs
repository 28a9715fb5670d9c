use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Errors that can occur when parsing an account identifier string.
#[derive(Debug, thiserror::Error)]
pub enum AddressError {
    #[error("account id must start with 'f'")]
    InvalidPrefix,
    #[error("account id must be {expected} characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("account id payload is not valid hexadecimal")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("account id payload must be exactly 32 bytes")]
    InvalidPayloadLength,
    #[error("account label must not be empty")]
    EmptyLabel,
}

/// Number of raw bytes contained in an account identifier.
pub const ACCOUNT_BYTES: usize = 32;
/// Expected string length of an encoded account id (prefix + 64 hex chars).
pub const ACCOUNT_STRING_LENGTH: usize = 1 + ACCOUNT_BYTES * 2;

/// Encode 32 raw bytes into the human readable `f<hex>` form.
pub fn encode_account(bytes: &[u8; ACCOUNT_BYTES]) -> String {
    let mut encoded = String::with_capacity(ACCOUNT_STRING_LENGTH);
    encoded.push('f');
    encoded.push_str(&hex::encode(bytes));
    encoded
}

/// Decode the `f<hex>` form back into raw bytes.
pub fn decode_account(account: &str) -> Result<[u8; ACCOUNT_BYTES], AddressError> {
    if !account.starts_with('f') {
        return Err(AddressError::InvalidPrefix);
    }

    if account.len() != ACCOUNT_STRING_LENGTH {
        return Err(AddressError::InvalidLength {
            expected: ACCOUNT_STRING_LENGTH,
            actual: account.len(),
        });
    }

    let decoded = hex::decode(&account[1..])?;
    decoded
        .try_into()
        .map_err(|_| AddressError::InvalidPayloadLength)
}

/// Identifier of a participant: a user, the operator, or the farm's custody account.
///
/// Serialised as its encoded string so it can key JSON maps.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(pub [u8; ACCOUNT_BYTES]);

impl AccountId {
    /// Deterministically derive an account from a human label such as `"alice"`.
    pub fn from_label(label: &str) -> Self {
        AccountId(*blake3::hash(label.as_bytes()).as_bytes())
    }

    /// Derive a sub-account under a domain, e.g. the custody account of a farm.
    pub fn derive(domain: &str, seed: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(domain.as_bytes());
        hasher.update(seed);
        AccountId(*hasher.finalize().as_bytes())
    }

    /// Parse either an encoded id (`f<64 hex>`) or fall back to a label.
    pub fn parse_or_label(value: &str) -> Result<Self, AddressError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(AddressError::EmptyLabel);
        }
        if value.len() == ACCOUNT_STRING_LENGTH && value.starts_with('f') {
            return decode_account(value).map(AccountId);
        }
        Ok(Self::from_label(value))
    }

    pub fn as_bytes(&self) -> &[u8; ACCOUNT_BYTES] {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode_account(&self.0))
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps logs readable.
        write!(f, "AccountId(f{}..)", hex::encode(&self.0[..4]))
    }
}

impl Default for AccountId {
    fn default() -> Self {
        AccountId([0u8; ACCOUNT_BYTES])
    }
}

impl From<[u8; ACCOUNT_BYTES]> for AccountId {
    fn from(value: [u8; ACCOUNT_BYTES]) -> Self {
        AccountId(value)
    }
}

impl From<AccountId> for String {
    fn from(value: AccountId) -> Self {
        encode_account(&value.0)
    }
}

impl TryFrom<String> for AccountId {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        decode_account(&value).map(AccountId)
    }
}

impl FromStr for AccountId {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_account(s).map(AccountId)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_form_parses_back() {
        let account = AccountId([0xABu8; ACCOUNT_BYTES]);
        let encoded = account.to_string();
        assert!(encoded.starts_with('f'));
        assert_eq!(encoded.len(), ACCOUNT_STRING_LENGTH);
        assert_eq!(encoded.parse::<AccountId>().unwrap(), account);
    }

    #[test]
    fn labels_are_deterministic() {
        assert_eq!(AccountId::from_label("alice"), AccountId::from_label("alice"));
        assert_ne!(AccountId::from_label("alice"), AccountId::from_label("bob"));
    }

    #[test]
    fn parse_or_label_accepts_both_forms() {
        let alice = AccountId::from_label("alice");
        assert_eq!(AccountId::parse_or_label("alice").unwrap(), alice);
        assert_eq!(AccountId::parse_or_label(&alice.to_string()).unwrap(), alice);
        assert!(matches!(
            AccountId::parse_or_label("  "),
            Err(AddressError::EmptyLabel)
        ));
    }

    #[test]
    fn invalid_prefix_rejected() {
        let bad = "x".to_string() + &"00".repeat(ACCOUNT_BYTES);
        assert!(matches!(
            decode_account(&bad),
            Err(AddressError::InvalidPrefix)
        ));
    }

    #[test]
    fn invalid_hex_rejected() {
        let bad = format!("f{}", "gg".repeat(ACCOUNT_BYTES));
        assert!(matches!(decode_account(&bad), Err(AddressError::InvalidHex(_))));
    }

    #[test]
    fn serialises_as_string() {
        let account = AccountId::from_label("carol");
        let json = serde_json::to_string(&account).unwrap();
        assert_eq!(json, format!("\"{}\"", account));
        let back: AccountId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, account);
    }
}
