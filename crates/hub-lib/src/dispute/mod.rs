mod monitor;
pub use monitor::{mark_accepted, DisputeMonitor, DisputeOutcome, DisputePolicy};

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use strum::AsRefStr;

use crate::channel::Balances;
use crate::primitives::Hash256;
use crate::serde_utils::U128Hex;
use crate::Result;

pub const DEFAULT_DISPUTE_WINDOW_BLOCKS: u64 = 144;
pub const DEFAULT_DISPUTE_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_DISPUTE_RETRY_BASE_MILLIS: u64 = 500;
pub const DEFAULT_DISPUTE_MAX_BACKOFF_MILLIS: u64 = 4000;

#[derive(Debug, Copy, Clone, Serialize, Deserialize, Eq, PartialEq, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DisputeStatus {
    /// Not yet accepted for broadcast, retried by the sweeper.
    Pending,
    /// Accepted for broadcast by the settlement layer.
    Submitted,
    /// Observed on the settlement layer.
    Accepted,
    /// The window closed before a submission was accepted.
    Expired,
}

/// One per closing transition, keyed by (channel id, claimed nonce).
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct DisputeRecord {
    pub channel_id: Hash256,
    #[serde_as(as = "U128Hex")]
    pub claimed_nonce: u128,
    pub claimed_balances: Balances,
    #[serde_as(as = "U128Hex")]
    pub held_nonce: u128,
    /// Last settlement-layer height at which a dispute is accepted.
    pub deadline: u64,
    pub status: DisputeStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub tx_id: Option<String>,
}

pub trait DisputeStore {
    fn get_dispute_record(
        &self,
        channel_id: &Hash256,
        claimed_nonce: u128,
    ) -> Result<Option<DisputeRecord>>;

    /// Records of one channel, or of every channel.
    fn get_dispute_records(&self, channel_id: Option<&Hash256>) -> Result<Vec<DisputeRecord>>;
}
