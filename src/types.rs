use std::fmt;
use std::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseKeyError {
    #[error("invalid base58: {0}")]
    Base58(String),
    #[error("expected 32 bytes, found {0}")]
    WrongLength(usize),
}

/// 32-byte ledger address: account keys, program ids, learner identities.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize)]
pub struct Pubkey([u8; 32]);

impl Pubkey {
    pub const fn new_from_array(bytes: [u8; 32]) -> Self { Self(bytes) }
    pub fn to_bytes(&self) -> [u8; 32] { self.0 }
    pub fn as_bytes(&self) -> &[u8; 32] { &self.0 }
}

impl AsRef<[u8]> for Pubkey {
    fn as_ref(&self) -> &[u8] { &self.0 }
}

impl FromStr for Pubkey {
    type Err = ParseKeyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s).into_vec().map_err(|e| ParseKeyError::Base58(e.to_string()))?;
        let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| ParseKeyError::WrongLength(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Pubkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pubkey({})", self)
    }
}

impl Serialize for Pubkey {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Pubkey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = <String as Deserialize>::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Recent blockhash a message is bound to.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Hash(pub [u8; 32]);

impl FromStr for Hash {
    type Err = ParseKeyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: Pubkey = s.parse()?;
        Ok(Self(key.to_bytes()))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", bs58::encode(self.0).into_string())
    }
}

/// ed25519 transaction signature; the first one doubles as the transaction id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxSignature(pub [u8; 64]);

impl Default for TxSignature {
    fn default() -> Self { Self([0u8; 64]) }
}

impl FromStr for TxSignature {
    type Err = ParseKeyError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s).into_vec().map_err(|e| ParseKeyError::Base58(e.to_string()))?;
        let arr: [u8; 64] = bytes.as_slice().try_into().map_err(|_| ParseKeyError::WrongLength(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxSignature({})", self)
    }
}

impl Serialize for TxSignature {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pubkey_base58_round_trips_known_program_id() {
        let id: Pubkey = "ACADBRCB3zGvo1KSCbkztS33ZNzeBv2d7bqGceti3ucf".parse().unwrap();
        assert_eq!(id.to_string(), "ACADBRCB3zGvo1KSCbkztS33ZNzeBv2d7bqGceti3ucf");
        assert_eq!(id.as_bytes()[0], 136);
    }

    #[test]
    fn all_ones_is_the_zero_key() {
        let id: Pubkey = "11111111111111111111111111111111".parse().unwrap();
        assert_eq!(id, Pubkey::default());
    }

    #[test]
    fn rejects_short_keys() {
        assert_eq!("abc".parse::<Pubkey>(), Err(ParseKeyError::WrongLength(3)));
        assert!(matches!("0OIl".parse::<Pubkey>(), Err(ParseKeyError::Base58(_))));
    }

    #[test]
    fn pubkey_serializes_as_base58_string() {
        let key = Pubkey::new_from_array([1u8; 32]);
        let json = serde_json::to_string(&key).unwrap();
        let back: Pubkey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(json.starts_with('"'));
    }
}
