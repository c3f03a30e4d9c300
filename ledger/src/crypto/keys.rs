//! # Audit Signing Keys
//!
//! Each ledger instance holds one Ed25519 keypair and signs the hash of
//! every audit block it appends. The signature is the block's "signature
//! token": it pins each block to the key that wrote it, so rewriting the
//! newest block and recomputing its hash is still caught on verification.
//!
//! Key bytes are never logged. `Debug` prints the public half only.

use ed25519_dalek::{Signature as DalekSignature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;
use thiserror::Error;

/// Errors that can occur while loading key material.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid secret key: expected 32 bytes of hex")]
    InvalidSecretKey,

    #[error("invalid public key: not a valid Ed25519 point")]
    InvalidPublicKey,
}

/// The ledger's audit signing keypair.
///
/// Deliberately not `Serialize`. Exporting the secret goes through
/// [`AuditKeypair::secret_hex`] and nothing else.
pub struct AuditKeypair {
    signing_key: SigningKey,
}

impl AuditKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Build a keypair deterministically from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Load a keypair from a hex-encoded 32-byte secret, as written by
    /// `blackbox-node init`. Surrounding whitespace is ignored.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = hex::decode(hex_str.trim()).map_err(|_| KeyError::InvalidSecretKey)?;
        let seed: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_seed(&seed))
    }

    /// Hex-encoded secret key. Handle with care.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Hex-encoded public key, as stored in `AuditBlock::signer`.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.signing_key.verifying_key().to_bytes())
    }

    /// Sign `message` and return the 64-byte signature as hex.
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.signing_key.sign(message).to_bytes())
    }
}

impl Clone for AuditKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
        }
    }
}

impl fmt::Debug for AuditKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AuditKeypair(pub={})", self.public_key_hex())
    }
}

/// Parse a hex public key, checking that it is a valid curve point.
pub fn parse_public_key(hex_str: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = hex::decode(hex_str).map_err(|_| KeyError::InvalidPublicKey)?;
    let arr: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::InvalidPublicKey)?;
    VerifyingKey::from_bytes(&arr).map_err(|_| KeyError::InvalidPublicKey)
}

/// Verify a hex signature over `message` against a hex public key.
///
/// Any malformed input is just `false`. Callers want a yes/no answer.
pub fn verify_hex(public_key_hex: &str, message: &[u8], signature_hex: &str) -> bool {
    let Ok(verifying_key) = parse_public_key(public_key_hex) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(sig_arr) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
        return false;
    };
    let signature = DalekSignature::from_bytes(&sig_arr);
    verifying_key.verify(message, &signature).is_ok()
}
