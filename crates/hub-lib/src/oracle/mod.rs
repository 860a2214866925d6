//! Verify/sign oracle: the only place the signature scheme's byte encoding
//! is known.

mod gateway;
pub use gateway::GatewayOracle;
mod local;
pub use local::LocalOracle;

use secp256k1::{
    ecdsa::{RecoverableSignature, RecoveryId},
    Message, PublicKey, Secp256k1, SecretKey,
};
use serde::{Deserialize, Serialize};

use crate::channel::StateMessage;
use crate::primitives::{sha256, Principal, Signature, SIGNATURE_SIZE};
use crate::{Error, Result};

/// Prefix of structured-data digests, as hashed by the settlement contract.
pub const STRUCTURED_DATA_PREFIX: &[u8] = b"SIP018";

#[async_trait::async_trait]
pub trait SignatureOracle: Send + Sync {
    /// Whether `signature` is `signer`'s signature over `message`.
    async fn verify(
        &self,
        signature: &Signature,
        signer: &Principal,
        message: &StateMessage,
    ) -> Result<bool>;

    async fn sign(&self, message: &StateMessage, key: &SecretKey) -> Result<Signature>;
}

/// Domain separating signatures of one contract deployment from any other.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SigningDomain {
    pub name: String,
    pub version: String,
    pub chain_id: u64,
}

impl SigningDomain {
    pub fn hash(&self) -> [u8; 32] {
        let mut buf = Vec::with_capacity(64);
        for field in [self.name.as_bytes(), self.version.as_bytes()] {
            buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
            buf.extend_from_slice(field);
        }
        buf.extend_from_slice(&self.chain_id.to_be_bytes());
        sha256(buf)
    }

    /// `sha256(prefix || domain hash || message hash)`
    pub fn digest(&self, message: &StateMessage) -> [u8; 32] {
        self.digest_of_hash(&sha256(message.encode()))
    }

    pub fn digest_of_hash(&self, message_hash: &[u8; 32]) -> [u8; 32] {
        let mut buf = Vec::with_capacity(STRUCTURED_DATA_PREFIX.len() + 64);
        buf.extend_from_slice(STRUCTURED_DATA_PREFIX);
        buf.extend_from_slice(&self.hash());
        buf.extend_from_slice(message_hash);
        sha256(buf)
    }
}

/// The hub's own principal and signing key, handed to the components that
/// sign on its behalf.
#[derive(Clone)]
pub struct HubIdentity {
    pub principal: Principal,
    secret_key: SecretKey,
}

impl HubIdentity {
    pub fn new(principal: Principal, secret_key: SecretKey) -> Self {
        Self {
            principal,
            secret_key,
        }
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_secret_key(&Secp256k1::new(), &self.secret_key)
    }
}

impl std::fmt::Debug for HubIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubIdentity")
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}

pub fn sign_digest(digest: &[u8; 32], key: &SecretKey) -> Signature {
    let secp = Secp256k1::signing_only();
    let message = Message::from_digest(*digest);
    let (recovery_id, compact) = secp
        .sign_ecdsa_recoverable(&message, key)
        .serialize_compact();
    let mut bytes = [0u8; SIGNATURE_SIZE];
    bytes[..64].copy_from_slice(&compact);
    bytes[64] = recovery_id.to_i32() as u8;
    bytes.into()
}

pub fn recover_signer(digest: &[u8; 32], signature: &Signature) -> Result<PublicKey> {
    let bytes = signature.as_ref();
    let recovery_id = RecoveryId::from_i32(bytes[64] as i32)
        .map_err(|e| Error::InvalidSignature(format!("bad recovery id: {}", e)))?;
    let recoverable = RecoverableSignature::from_compact(&bytes[..64], recovery_id)
        .map_err(|e| Error::InvalidSignature(e.to_string()))?;
    Secp256k1::verification_only()
        .recover_ecdsa(&Message::from_digest(*digest), &recoverable)
        .map_err(|e| Error::InvalidSignature(e.to_string()))
}

#[cfg(test)]
mod tests;
