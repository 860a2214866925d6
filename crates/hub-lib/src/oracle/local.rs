use std::collections::HashMap;
use std::sync::RwLock;

use secp256k1::{PublicKey, SecretKey};
use tracing::debug;

use super::{recover_signer, sign_digest, SignatureOracle, SigningDomain};
use crate::channel::StateMessage;
use crate::primitives::{Principal, Signature};
use crate::Result;

/// Oracle that hashes and verifies locally against a registry of known
/// principal keys.
pub struct LocalOracle {
    domain: SigningDomain,
    keys: RwLock<HashMap<Principal, PublicKey>>,
}

impl LocalOracle {
    pub fn new(domain: SigningDomain) -> Self {
        Self {
            domain,
            keys: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, principal: Principal, public_key: PublicKey) {
        self.keys
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(principal, public_key);
    }

    pub fn domain(&self) -> &SigningDomain {
        &self.domain
    }
}

#[async_trait::async_trait]
impl SignatureOracle for LocalOracle {
    async fn verify(
        &self,
        signature: &Signature,
        signer: &Principal,
        message: &StateMessage,
    ) -> Result<bool> {
        let expected = match self
            .keys
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(signer)
        {
            Some(key) => *key,
            None => {
                debug!("No public key registered for {}", signer);
                return Ok(false);
            }
        };
        let digest = self.domain.digest(message);
        Ok(match recover_signer(&digest, signature) {
            Ok(recovered) => recovered == expected,
            Err(_) => false,
        })
    }

    async fn sign(&self, message: &StateMessage, key: &SecretKey) -> Result<Signature> {
        Ok(sign_digest(&self.domain.digest(message), key))
    }
}
