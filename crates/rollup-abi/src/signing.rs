use std::path::Path;

use ethers_core::types::{Address, RecoveryMessage, Signature, H256, U256};
use ethers_core::utils::{hash_message, keccak256};
use ethers_signers::{LocalWallet, Signer};

/// Errors from key handling and signature recovery.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum SignError {
    /// Keystore could not be decrypted or the key is unusable.
    #[error("wallet error: {0}")]
    Wallet(String),
    /// The signature bytes are not a valid 65-byte r‖s‖v signature, or
    /// recovery failed.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
}

/// The digest every chain-facing signature covers:
/// `keccak256("\x19Ethereum Signed Message:\n32" || keccak256(data))`.
pub fn prefixed_digest(data: &[u8]) -> H256 {
    hash_message(keccak256(data))
}

/// One argument of a packed in-contract authorization message.
#[derive(Debug, Clone)]
pub enum PackedValue {
    /// 20 raw bytes.
    Address(Address),
    /// 32 big-endian bytes.
    Uint(U256),
    /// Raw UTF-8, no length prefix.
    Str(String),
}

/// Digests the tight concatenation of `values` the way the contracts verify
/// deposit/withdraw/transfer authorizations.
pub fn packed_digest(values: &[PackedValue]) -> H256 {
    let mut packed = Vec::new();
    for value in values {
        match value {
            PackedValue::Address(address) => packed.extend_from_slice(address.as_bytes()),
            PackedValue::Uint(uint) => {
                let mut word = [0u8; 32];
                uint.to_big_endian(&mut word);
                packed.extend_from_slice(&word);
            }
            PackedValue::Str(s) => packed.extend_from_slice(s.as_bytes()),
        }
    }
    prefixed_digest(&packed)
}

/// Recovers the signer of `data` from a 65-byte signature over
/// [`prefixed_digest`].
pub fn recover_signer(data: &[u8], signature: &[u8]) -> Result<Address, SignError> {
    let signature =
        Signature::try_from(signature).map_err(|e| SignError::InvalidSignature(e.to_string()))?;
    signature
        .recover(RecoveryMessage::Hash(prefixed_digest(data)))
        .map_err(|e| SignError::InvalidSignature(e.to_string()))
}

/// True if `signature` over `data` recovers to `signer`.
pub fn signature_is_valid(signer: Address, data: &[u8], signature: &[u8]) -> bool {
    recover_signer(data, signature).map(|recovered| recovered == signer) == Ok(true)
}

/// A signing identity for one chain: its ECDSA key plus the address role
/// checks compare against.
#[derive(Debug, Clone)]
pub struct BlockSigner {
    wallet: LocalWallet,
}

impl BlockSigner {
    /// Wraps an already-loaded wallet.
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    /// Decrypts a JSON keystore file.
    pub fn from_keystore(path: impl AsRef<Path>, password: &str) -> Result<Self, SignError> {
        let wallet = LocalWallet::decrypt_keystore(path, password)
            .map_err(|e| SignError::Wallet(e.to_string()))?;
        Ok(Self { wallet })
    }

    /// A throwaway random key for tests and the demo runner.
    pub fn random() -> Self {
        Self {
            wallet: LocalWallet::new(&mut rand::thread_rng()),
        }
    }

    /// The address this key controls.
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Signs `data` over [`prefixed_digest`], returning 65 bytes with `v`
    /// normalized to 27/28.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SignError> {
        self.sign_digest(prefixed_digest(data))
    }

    /// Signs a packed authorization message; see [`packed_digest`].
    pub fn sign_packed(&self, values: &[PackedValue]) -> Result<Vec<u8>, SignError> {
        self.sign_digest(packed_digest(values))
    }

    fn sign_digest(&self, digest: H256) -> Result<Vec<u8>, SignError> {
        let mut signature = self
            .wallet
            .sign_hash(digest)
            .map_err(|e| SignError::Wallet(e.to_string()))?;
        if signature.v < 27 {
            signature.v += 27;
        }
        Ok(signature.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_recover_round_trips() {
        let signer = BlockSigner::random();
        let data = b"block bytes".to_vec();
        let signature = signer.sign(&data).unwrap();
        assert_eq!(signature.len(), 65);
        assert!(signature[64] == 27 || signature[64] == 28);
        assert_eq!(recover_signer(&data, &signature).unwrap(), signer.address());
        assert!(signature_is_valid(signer.address(), &data, &signature));
    }

    #[test]
    fn recovery_rejects_wrong_data_and_signer() {
        let signer = BlockSigner::random();
        let other = BlockSigner::random();
        let signature = signer.sign(b"payload").unwrap();
        assert!(!signature_is_valid(signer.address(), b"other payload", &signature));
        assert!(!signature_is_valid(other.address(), b"payload", &signature));
        assert!(recover_signer(b"payload", &[0u8; 10]).is_err());
    }

    #[test]
    fn packed_digest_is_tight_concatenation() {
        let account = Address::repeat_byte(0x01);
        let digest = packed_digest(&[
            PackedValue::Address(account),
            PackedValue::Str("withdraw".to_string()),
            PackedValue::Uint(U256::from(5)),
        ]);

        let mut manual = Vec::new();
        manual.extend_from_slice(account.as_bytes());
        manual.extend_from_slice(b"withdraw");
        let mut word = [0u8; 32];
        U256::from(5).to_big_endian(&mut word);
        manual.extend_from_slice(&word);
        assert_eq!(digest, prefixed_digest(&manual));
    }

    #[test]
    fn packed_signatures_recover() {
        let signer = BlockSigner::random();
        let values = [
            PackedValue::Address(signer.address()),
            PackedValue::Uint(U256::from(42)),
        ];
        let signature = signer.sign_packed(&values).unwrap();
        let parsed = Signature::try_from(signature.as_slice()).unwrap();
        let recovered = parsed
            .recover(RecoveryMessage::Hash(packed_digest(&values)))
            .unwrap();
        assert_eq!(recovered, signer.address());
    }
}
