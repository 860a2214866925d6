//! Interface to the settlement layer: the ledger contract that enforces
//! channel closures and disputes.

mod config;
pub use config::{SettlementConfig, DEFAULT_SETTLEMENT_RPC_URL};
mod gateway;
pub(crate) use gateway::build_client;
pub use gateway::{GatewaySettlement, SettlementGatewayRpcClient, VerifySignatureParams};

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::channel::{ChannelKey, SignedState};
use crate::serde_utils::U128Hex;
use crate::Result;

/// A dispute carrying the hub's strongest signed state against a stale closure.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DisputeSubmission {
    pub channel_key: ChannelKey,
    pub state: SignedState,
    #[serde_as(as = "U128Hex")]
    pub claimed_nonce: u128,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmissionOutcome {
    /// Accepted for broadcast. Inclusion is not implied.
    Accepted { tx_id: String },
    /// An identical dispute was accepted earlier.
    AlreadyAccepted,
    /// The settlement layer no longer accepts a dispute for this closure.
    WindowClosed,
}

#[async_trait::async_trait]
pub trait SettlementLayer: Send + Sync {
    async fn current_height(&self) -> Result<u64>;

    async fn submit_dispute(&self, submission: &DisputeSubmission) -> Result<SubmissionOutcome>;
}
