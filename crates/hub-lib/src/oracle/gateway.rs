use std::time::Duration;

use jsonrpsee::http_client::HttpClient;
use secp256k1::SecretKey;

use super::{sign_digest, SignatureOracle, SigningDomain};
use crate::channel::StateMessage;
use crate::primitives::{Principal, Signature};
use crate::settlement::{SettlementGatewayRpcClient, VerifySignatureParams};
use crate::{Error, Result};

/// Oracle that defers hashing and verification to the settlement contract's
/// read-only functions, through the settlement gateway. Signing stays local.
pub struct GatewayOracle {
    client: HttpClient,
    domain: SigningDomain,
}

impl GatewayOracle {
    pub fn new(url: &str, timeout: Duration, domain: SigningDomain) -> Result<Self> {
        Ok(Self {
            client: crate::settlement::build_client(url, timeout)?,
            domain,
        })
    }
}

#[async_trait::async_trait]
impl SignatureOracle for GatewayOracle {
    async fn verify(
        &self,
        signature: &Signature,
        signer: &Principal,
        message: &StateMessage,
    ) -> Result<bool> {
        self.client
            .verify_signature(VerifySignatureParams {
                signature: *signature,
                signer: signer.clone(),
                message: message.clone(),
            })
            .await
            .map_err(|e| Error::ExternalServiceError(format!("verify_signature failed: {}", e)))
    }

    async fn sign(&self, message: &StateMessage, key: &SecretKey) -> Result<Signature> {
        let hash = self
            .client
            .structured_data_hash(message.clone())
            .await
            .map_err(|e| {
                Error::ExternalServiceError(format!("structured_data_hash failed: {}", e))
            })?;
        Ok(sign_digest(
            &self.domain.digest_of_hash(&hash.into()),
            key,
        ))
    }
}
