use std::time::Duration;

use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DisputeSubmission, SettlementLayer, SubmissionOutcome};
use crate::channel::StateMessage;
use crate::primitives::{Hash256, Principal, Signature};
use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifySignatureParams {
    pub signature: Signature,
    pub signer: Principal,
    pub message: StateMessage,
}

/// RPC exposed by the settlement gateway, a thin service in front of the
/// ledger node that evaluates the contract's read-only functions and
/// broadcasts contract calls.
#[rpc(client)]
pub trait SettlementGatewayRpc {
    /// Height of the latest settlement-layer block.
    #[method(name = "block_height")]
    async fn block_height(&self) -> Result<u64, ErrorObjectOwned>;

    /// Broadcast a `dispute-closure` contract call.
    #[method(name = "submit_dispute")]
    async fn submit_dispute(
        &self,
        params: DisputeSubmission,
    ) -> Result<SubmissionOutcome, ErrorObjectOwned>;

    /// Evaluate the contract's `verify-signature` read-only function.
    #[method(name = "verify_signature")]
    async fn verify_signature(
        &self,
        params: VerifySignatureParams,
    ) -> Result<bool, ErrorObjectOwned>;

    /// Hash of the structured data the contract builds for a state.
    #[method(name = "structured_data_hash")]
    async fn structured_data_hash(&self, params: StateMessage) -> Result<Hash256, ErrorObjectOwned>;
}

pub(crate) fn build_client(url: &str, timeout: Duration) -> Result<HttpClient> {
    HttpClientBuilder::default()
        .request_timeout(timeout)
        .build(url)
        .map_err(|e| Error::ExternalServiceError(format!("settlement gateway {}: {}", url, e)))
}

fn gateway_error(method: &str, err: impl std::fmt::Display) -> Error {
    Error::ExternalServiceError(format!("settlement gateway {} failed: {}", method, err))
}

/// [`SettlementLayer`] backed by the settlement gateway.
pub struct GatewaySettlement {
    client: HttpClient,
}

impl GatewaySettlement {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(url, timeout)?,
        })
    }
}

#[async_trait::async_trait]
impl SettlementLayer for GatewaySettlement {
    async fn current_height(&self) -> Result<u64> {
        self.client
            .block_height()
            .await
            .map_err(|e| gateway_error("block_height", e))
    }

    async fn submit_dispute(&self, submission: &DisputeSubmission) -> Result<SubmissionOutcome> {
        debug!(
            "Submitting dispute for channel {} against claimed nonce {}",
            submission.state.channel_id, submission.claimed_nonce
        );
        self.client
            .submit_dispute(submission.clone())
            .await
            .map_err(|e| gateway_error("submit_dispute", e))
    }
}
