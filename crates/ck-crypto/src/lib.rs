use async_trait::async_trait;
use ck_api_types::{KeyPair, UserDecryptTypedData};
use ed25519_dalek::{Signature, Signer as DalekSigner, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::Zeroizing;

const TYPED_DATA_TAG: &[u8] = b"cipherkit:v1:eip712:";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignerError {
    /// The account holder declined the request.
    #[error("signature request rejected: {0}")]
    Rejected(String),
    #[error("signer unavailable: {0}")]
    Unavailable(String),
    #[error("typed data could not be encoded: {0}")]
    Encoding(String),
}

/// Wallet-side signing capability. Signing may wait on user interaction for
/// an unbounded amount of time.
#[async_trait]
pub trait SignerCapability: Send + Sync {
    async fn address(&self) -> Result<String, SignerError>;
    async fn sign_typed_data(&self, typed_data: &UserDecryptTypedData) -> Result<String, SignerError>;
}

/// Digest signed by the local signers. Real wallets hash typed data per EIP-712
/// themselves; this is only used for keys held in-process.
pub fn typed_data_digest(typed_data: &UserDecryptTypedData) -> Result<[u8; 32], SignerError> {
    let encoded = serde_json::to_vec(typed_data).map_err(|err| SignerError::Encoding(err.to_string()))?;
    let mut hasher = Sha256::new();
    hasher.update(TYPED_DATA_TAG);
    hasher.update(&encoded);
    Ok(hasher.finalize().into())
}

pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    pub fn new_random() -> Self {
        let mut rng = OsRng;
        let signing_key = SigningKey::generate(&mut rng);
        Self { signing_key }
    }

    pub fn from_secret_key_bytes(secret_key: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&secret_key),
        }
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    pub fn wallet_address(&self) -> String {
        address_from_public_key(&self.public_key_bytes())
    }
}

#[async_trait]
impl SignerCapability for Ed25519Signer {
    async fn address(&self) -> Result<String, SignerError> {
        Ok(self.wallet_address())
    }

    async fn sign_typed_data(&self, typed_data: &UserDecryptTypedData) -> Result<String, SignerError> {
        let digest = typed_data_digest(typed_data)?;
        let signature: Signature = self.signing_key.sign(&digest);
        Ok(format!("0x{}", hex::encode(signature.to_bytes())))
    }
}

/// Checks a signature produced by [`Ed25519Signer::sign_typed_data`].
pub fn verify_ed25519_typed_data(
    public_key_hex: &str,
    typed_data: &UserDecryptTypedData,
    signature_hex: &str,
) -> Result<bool, SignerError> {
    let public_key: [u8; 32] = decode_fixed(public_key_hex)?;
    let signature: [u8; 64] = decode_fixed(signature_hex)?;
    let verifying_key =
        VerifyingKey::from_bytes(&public_key).map_err(|err| SignerError::Encoding(err.to_string()))?;
    let digest = typed_data_digest(typed_data)?;
    Ok(verifying_key
        .verify(&digest, &Signature::from_bytes(&signature))
        .is_ok())
}

/// ECDSA signer over secp256k1, the curve browser wallets sign with.
pub struct Secp256k1Signer {
    signing_key: k256::ecdsa::SigningKey,
}

impl Secp256k1Signer {
    pub fn new_random() -> Self {
        Self {
            signing_key: k256::ecdsa::SigningKey::random(&mut OsRng),
        }
    }

    pub fn verifying_key(&self) -> &k256::ecdsa::VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn wallet_address(&self) -> String {
        let point = self.signing_key.verifying_key().to_encoded_point(false);
        address_from_public_key(point.as_bytes())
    }
}

#[async_trait]
impl SignerCapability for Secp256k1Signer {
    async fn address(&self) -> Result<String, SignerError> {
        Ok(self.wallet_address())
    }

    async fn sign_typed_data(&self, typed_data: &UserDecryptTypedData) -> Result<String, SignerError> {
        use k256::ecdsa::signature::Signer as _;

        let digest = typed_data_digest(typed_data)?;
        let signature: k256::ecdsa::Signature = self.signing_key.sign(&digest);
        Ok(format!("0x{}", hex::encode(signature.to_bytes())))
    }
}

/// Fresh re-encryption keypair for clients that do not bring their own.
pub fn generate_keypair() -> KeyPair {
    let signing_key = SigningKey::generate(&mut OsRng);
    let secret = Zeroizing::new(signing_key.to_bytes());
    KeyPair {
        public_key: hex::encode(signing_key.verifying_key().to_bytes()),
        private_key: hex::encode(secret.as_slice()),
    }
}

fn address_from_public_key(public_key: &[u8]) -> String {
    let digest = Sha256::digest(public_key);
    format!("0x{}", hex::encode(&digest[..20]))
}

fn decode_fixed<const N: usize>(input: &str) -> Result<[u8; N], SignerError> {
    let raw = input.strip_prefix("0x").unwrap_or(input);
    let bytes = hex::decode(raw).map_err(|err| SignerError::Encoding(err.to_string()))?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| SignerError::Encoding(format!("expected {N} bytes, got {}", bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ck_api_types::{Eip712Domain, UserDecryptMessage};

    fn typed_data(start_timestamp: u64) -> UserDecryptTypedData {
        UserDecryptTypedData::new(
            Eip712Domain {
                name: "Decryption".to_owned(),
                version: "1".to_owned(),
                chain_id: 31337,
                verifying_contract: "0x05fd9b5efe0a996095f42ed7e77c390810cf660c".to_owned(),
            },
            UserDecryptMessage {
                public_key: "0xaa".to_owned(),
                contract_addresses: vec!["0x01".to_owned(), "0x02".to_owned()],
                start_timestamp,
                duration_days: 7,
            },
        )
    }

    #[tokio::test]
    async fn ed25519_signature_verifies_against_same_payload_only() {
        let signer = Ed25519Signer::new_random();
        let signature = signer
            .sign_typed_data(&typed_data(1_700_000_000))
            .await
            .expect("local signer never rejects");

        let public_key = signer.public_key_hex();
        assert!(verify_ed25519_typed_data(&public_key, &typed_data(1_700_000_000), &signature).unwrap());
        assert!(!verify_ed25519_typed_data(&public_key, &typed_data(1_700_000_001), &signature).unwrap());
    }

    #[tokio::test]
    async fn address_is_stable_for_secret() {
        let first = Ed25519Signer::from_secret_key_bytes([7_u8; 32]);
        let second = Ed25519Signer::from_secret_key_bytes([7_u8; 32]);

        let address = first.address().await.unwrap();
        assert_eq!(address, second.address().await.unwrap());
        assert!(address.starts_with("0x"));
        assert_eq!(address.len(), 42);
    }

    #[tokio::test]
    async fn secp256k1_signature_verifies_with_its_key() {
        let signer = Secp256k1Signer::new_random();
        let payload = typed_data(1_700_000_000);
        let signature = signer.sign_typed_data(&payload).await.unwrap();

        let bytes = hex::decode(signature.trim_start_matches("0x")).unwrap();
        let signature = k256::ecdsa::Signature::from_slice(&bytes).unwrap();
        let digest = typed_data_digest(&payload).unwrap();
        assert!(k256::ecdsa::signature::Verifier::verify(signer.verifying_key(), &digest, &signature).is_ok());

        let other = typed_data_digest(&typed_data(1_700_000_001)).unwrap();
        assert!(k256::ecdsa::signature::Verifier::verify(signer.verifying_key(), &other, &signature).is_err());

        let address = signer.address().await.unwrap();
        assert_eq!(address, signer.wallet_address());
        assert_eq!(address.len(), 42);
    }

    #[test]
    fn digest_depends_on_contract_set() {
        let base = typed_data(1);
        let mut other = typed_data(1);
        other.message.contract_addresses.pop();
        assert_ne!(typed_data_digest(&base).unwrap(), typed_data_digest(&other).unwrap());
    }

    #[test]
    fn generated_keypairs_are_distinct() {
        let first = generate_keypair();
        let second = generate_keypair();
        assert_ne!(first.public_key, second.public_key);
        assert_eq!(first.private_key.len(), 64);
    }

    #[test]
    fn malformed_signature_hex_is_an_encoding_error() {
        let signer = Ed25519Signer::new_random();
        let err = verify_ed25519_typed_data(&signer.public_key_hex(), &typed_data(1), "0xzz").unwrap_err();
        assert!(matches!(err, SignerError::Encoding(_)));
    }
}
