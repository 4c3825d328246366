use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;

use crate::types::{Pubkey, TxSignature};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("signing declined: {0}")]
    Declined(String),
    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

/// Credential holder that approves transactions. Signing may wait on a person,
/// so it is async and may be declined; nothing has been submitted at that point.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn pubkey(&self) -> Pubkey;
    async fn sign_message(&self, message: &[u8]) -> Result<TxSignature, SignerError>;
}

/// In-process ed25519 key.
pub struct KeypairSigner { sk: SigningKey }

impl KeypairSigner {
    pub fn generate() -> Self {
        Self { sk: SigningKey::generate(&mut OsRng) }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { sk: SigningKey::from_bytes(&seed) }
    }

    /// Accepts a 32-byte seed or a 64-byte seed‖pubkey keypair, hex encoded.
    pub fn from_hex(sk_hex: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(sk_hex.trim()).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        match bytes.len() {
            32 => {
                let mut seed = [0u8; 32];
                seed.copy_from_slice(&bytes);
                Ok(Self::from_seed(seed))
            }
            64 => {
                let mut pair = [0u8; 64];
                pair.copy_from_slice(&bytes);
                let sk = SigningKey::from_keypair_bytes(&pair).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
                Ok(Self { sk })
            }
            n => Err(SignerError::InvalidKey(format!("expected 32 or 64 bytes, found {n}"))),
        }
    }

    pub fn sign_now(&self, message: &[u8]) -> TxSignature {
        TxSignature(self.sk.sign(message).to_bytes())
    }
}

#[async_trait]
impl TransactionSigner for KeypairSigner {
    fn pubkey(&self) -> Pubkey {
        Pubkey::new_from_array(self.sk.verifying_key().to_bytes())
    }

    async fn sign_message(&self, message: &[u8]) -> Result<TxSignature, SignerError> {
        Ok(self.sign_now(message))
    }
}

pub fn verify_signature(pubkey: &Pubkey, message: &[u8], signature: &TxSignature) -> bool {
    let Ok(vk) = VerifyingKey::from_bytes(pubkey.as_bytes()) else {
        return false;
    };
    vk.verify(message, &Signature::from_bytes(&signature.0)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn signs_and_verifies() {
        let signer = KeypairSigner::from_seed([7u8; 32]);
        let sig = signer.sign_message(b"hello").await.unwrap();
        assert!(verify_signature(&signer.pubkey(), b"hello", &sig));
        assert!(!verify_signature(&signer.pubkey(), b"hellp", &sig));
    }

    #[test]
    fn hex_seed_and_keypair_forms_agree() {
        let a = KeypairSigner::from_seed([3u8; 32]);
        let seed_hex = hex::encode([3u8; 32]);
        let pair_hex = format!("{}{}", seed_hex, hex::encode(a.pubkey().as_bytes()));
        assert_eq!(KeypairSigner::from_hex(&seed_hex).unwrap().pubkey(), a.pubkey());
        assert_eq!(KeypairSigner::from_hex(&pair_hex).unwrap().pubkey(), a.pubkey());
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(matches!(KeypairSigner::from_hex("zz"), Err(SignerError::InvalidKey(_))));
        assert!(matches!(KeypairSigner::from_hex("abcd"), Err(SignerError::InvalidKey(_))));
        let mismatched = format!("{}{}", hex::encode([3u8; 32]), hex::encode([4u8; 32]));
        assert!(matches!(KeypairSigner::from_hex(&mismatched), Err(SignerError::InvalidKey(_))));
    }

    #[test]
    fn generated_keys_differ() {
        assert_ne!(KeypairSigner::generate().pubkey(), KeypairSigner::generate().pubkey());
    }
}
