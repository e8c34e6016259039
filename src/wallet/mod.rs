//! Wallet signing backends for the wallet-side poller.
//!
//! Production deployments put a human-facing browser wallet behind
//! [`WalletSigner`]; [`LocalWallet`] is a raw-key implementation so the
//! poller can be exercised end-to-end in development and tests.

use alloy_primitives::{Address, hex, keccak256};
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;

use crate::error::SignerError;
use crate::rpc::TransactionRequest;

/// The signing capability the poller dispatches requests to.
///
/// Implementations decide how consent is obtained; a browser wallet shows
/// the human a prompt, a local key signs immediately. Failures are returned
/// as errors and forwarded to the agent as result strings, never swallowed.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    /// The account this signer answers for.
    fn address(&self) -> Address;

    /// Sign raw message bytes per EIP-191 (`personal_sign`).
    async fn personal_sign(&self, message: &[u8]) -> Result<String, SignerError>;

    /// Submit a transaction and return its hash.
    async fn send_transaction(&self, tx: &TransactionRequest) -> Result<String, SignerError>;
}

/// In-process signer over a raw secp256k1 key.
pub struct LocalWallet {
    key: SigningKey,
    address: Address,
}

impl LocalWallet {
    /// Build from a hex-encoded 32-byte private key (`0x` prefix optional).
    pub fn from_hex_key(raw: &str) -> Result<Self, SignerError> {
        let bytes = hex::decode(raw).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        let key =
            SigningKey::from_slice(&bytes).map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        let address = address_of(&key);
        Ok(Self { key, address })
    }
}

impl std::fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Derive the Ethereum address of a signing key: keccak-256 of the
/// uncompressed public key, last 20 bytes.
fn address_of(key: &SigningKey) -> Address {
    let public = key.verifying_key().to_encoded_point(false);
    let hash = keccak256(&public.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// The EIP-191 "personal message" digest.
fn eip191_digest(message: &[u8]) -> [u8; 32] {
    let mut data = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    data.extend_from_slice(message);
    keccak256(&data).0
}

#[async_trait]
impl WalletSigner for LocalWallet {
    fn address(&self) -> Address {
        self.address
    }

    async fn personal_sign(&self, message: &[u8]) -> Result<String, SignerError> {
        let digest = eip191_digest(message);
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(&digest)
            .map_err(|e| SignerError::Signing(e.to_string()))?;

        let mut out = Vec::with_capacity(65);
        out.extend_from_slice(&signature.to_bytes());
        out.push(27 + recovery_id.to_byte());
        Ok(hex::encode_prefixed(out))
    }

    async fn send_transaction(&self, _tx: &TransactionRequest) -> Result<String, SignerError> {
        // Broadcasting needs a connected node; a raw key alone cannot do it.
        Err(SignerError::Unsupported(
            "eth_sendTransaction requires a connected wallet".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // Well-known hardhat development key #1.
    const TEST_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const TEST_ADDRESS: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

    #[test]
    fn derives_the_expected_address() {
        let wallet = LocalWallet::from_hex_key(TEST_KEY).unwrap();
        assert_eq!(wallet.address(), TEST_ADDRESS.parse::<Address>().unwrap());
    }

    #[test]
    fn rejects_malformed_keys() {
        assert!(LocalWallet::from_hex_key("0xnothex").is_err());
        assert!(LocalWallet::from_hex_key("0x1234").is_err());
    }

    #[tokio::test]
    async fn personal_sign_produces_a_recoverable_signature() {
        let wallet = LocalWallet::from_hex_key(TEST_KEY).unwrap();
        let signature = wallet.personal_sign(b"hello").await.unwrap();

        // 0x + 65 bytes hex-encoded.
        assert!(signature.starts_with("0x"));
        assert_eq!(signature.len(), 132);
        let v = u8::from_str_radix(&signature[130..], 16).unwrap();
        assert!(v == 27 || v == 28);

        // RFC 6979: deterministic for the same message.
        assert_eq!(wallet.personal_sign(b"hello").await.unwrap(), signature);
        assert_ne!(wallet.personal_sign(b"other").await.unwrap(), signature);
    }

    #[tokio::test]
    async fn send_transaction_is_unsupported_without_a_node() {
        let wallet = LocalWallet::from_hex_key(TEST_KEY).unwrap();
        let err = wallet
            .send_transaction(&TransactionRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SignerError::Unsupported(_)));
    }
}
