use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing an account key string.
#[derive(Debug, thiserror::Error)]
pub enum AccountIdError {
    #[error("account key must start with 'q'")]
    InvalidPrefix,
    #[error("account key must be {expected} characters, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("account key payload is not valid hexadecimal")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("account key payload must be exactly 32 bytes")]
    InvalidPayloadLength,
    #[error("account label is empty")]
    EmptyLabel,
}

/// Number of raw bytes in an account key.
pub const ACCOUNT_ID_BYTES: usize = 32;
/// Expected string length of an encoded key (prefix + 64 hex chars).
pub const ACCOUNT_ID_STRING_LENGTH: usize = 1 + ACCOUNT_ID_BYTES * 2;

/// 32-byte identity of a participant, pool, vault or governance key.
///
/// Encoded for humans and JSON as `q` followed by 64 hex characters, which
/// also lets the key be used directly as a JSON map key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(pub [u8; ACCOUNT_ID_BYTES]);

impl AccountId {
    /// Sentinel that terminates every referral chain. It never holds a node.
    pub const ROOT: AccountId = AccountId([0u8; ACCOUNT_ID_BYTES]);

    /// Deterministic key derived from a human label (`blake3(label)`).
    ///
    /// Used for well-known system accounts (vaults, escrows) and by the CLI
    /// so operators can refer to participants by name.
    pub fn from_label(label: &str) -> Self {
        AccountId(*blake3::hash(label.as_bytes()).as_bytes())
    }

    pub fn is_root(&self) -> bool {
        *self == Self::ROOT
    }

    pub fn as_bytes(&self) -> &[u8; ACCOUNT_ID_BYTES] {
        &self.0
    }

    pub fn encode(&self) -> String {
        let mut encoded = String::with_capacity(ACCOUNT_ID_STRING_LENGTH);
        encoded.push('q');
        encoded.push_str(&hex::encode(self.0));
        encoded
    }

    pub fn decode(value: &str) -> Result<Self, AccountIdError> {
        if !value.starts_with('q') {
            return Err(AccountIdError::InvalidPrefix);
        }
        if value.len() != ACCOUNT_ID_STRING_LENGTH {
            return Err(AccountIdError::InvalidLength {
                expected: ACCOUNT_ID_STRING_LENGTH,
                actual: value.len(),
            });
        }

        let decoded = hex::decode(&value[1..])?;
        let bytes: [u8; ACCOUNT_ID_BYTES] = decoded
            .try_into()
            .map_err(|_| AccountIdError::InvalidPayloadLength)?;
        Ok(AccountId(bytes))
    }

    /// Accept either an encoded key or a label.
    ///
    /// Strings shaped like an encoded key (`q` + 64 characters) must decode;
    /// anything else is hashed with [`AccountId::from_label`].
    pub fn resolve(input: &str) -> Result<Self, AccountIdError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AccountIdError::EmptyLabel);
        }
        if input.starts_with('q') && input.len() == ACCOUNT_ID_STRING_LENGTH {
            return AccountId::decode(input);
        }
        Ok(AccountId::from_label(input))
    }
}

impl From<[u8; ACCOUNT_ID_BYTES]> for AccountId {
    fn from(value: [u8; ACCOUNT_ID_BYTES]) -> Self {
        AccountId(value)
    }
}

impl From<AccountId> for String {
    fn from(value: AccountId) -> Self {
        value.encode()
    }
}

impl TryFrom<String> for AccountId {
    type Error = AccountIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        AccountId::decode(&value)
    }
}

impl FromStr for AccountId {
    type Err = AccountIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccountId::decode(s)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps tracing fields readable.
        write!(f, "q{}..", hex::encode(&self.0[..4]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn encode_decode_roundtrip() {
        let id = AccountId::from_label("alice");
        let encoded = id.encode();
        assert!(encoded.starts_with('q'));
        assert_eq!(encoded.len(), ACCOUNT_ID_STRING_LENGTH);
        assert_eq!(AccountId::decode(&encoded).expect("decode"), id);
    }

    #[test]
    fn invalid_prefix_rejected() {
        let bad = "x".to_string() + &"00".repeat(ACCOUNT_ID_BYTES);
        assert!(matches!(
            AccountId::decode(&bad),
            Err(AccountIdError::InvalidPrefix)
        ));
    }

    #[test]
    fn invalid_hex_rejected() {
        let bad = format!("q{}", "gg".repeat(ACCOUNT_ID_BYTES));
        assert!(matches!(
            AccountId::decode(&bad),
            Err(AccountIdError::InvalidHex(_))
        ));
    }

    #[test]
    fn usable_as_json_map_key() {
        let mut balances = HashMap::new();
        balances.insert(AccountId::from_label("bob"), 42u64);
        let json = serde_json::to_string(&balances).expect("serialize");
        let back: HashMap<AccountId, u64> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, balances);
    }

    #[test]
    fn resolve_accepts_keys_and_labels() {
        let alice = AccountId::from_label("alice");
        assert_eq!(AccountId::resolve("alice").unwrap(), alice);
        assert_eq!(AccountId::resolve(&alice.encode()).unwrap(), alice);
        assert!(AccountId::resolve("  ").is_err());

        let malformed = format!("q{}", "z".repeat(64));
        assert!(AccountId::resolve(&malformed).is_err());
    }

    #[test]
    fn root_is_all_zero() {
        assert!(AccountId::ROOT.is_root());
        assert!(!AccountId::from_label("root").is_root());
    }
}
