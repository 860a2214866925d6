//! Multi-hop conditional transfers: a hash-locked transfer into the hub on an
//! inbound channel, forwarded on an outbound channel under the same lock.

mod coordinator;
pub use coordinator::{LossReport, RevealOutcome, RoutedTransfer, RoutingCoordinator, SweepReport};

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::channel::{Action, Balances, ChannelKey, StateMessage};
use crate::primitives::{Hash256, Principal, Signature};
use crate::serde_utils::U128Hex;
use crate::Result;

pub const DEFAULT_ROUTING_BASE_FEE: u64 = 0;
pub const DEFAULT_ROUTING_FEE_RATE_PER_MILLION: u64 = 1000;
pub const DEFAULT_EXPIRY_SAFETY_MARGIN_BLOCKS: u64 = 10;

#[derive(Debug, Copy, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum HopRole {
    /// Counterparty pays the hub, locked on the secret.
    Inbound,
    /// Hub pays the next hop, locked on the same secret.
    Outbound,
}

/// The outbound state an inbound entry waits for.
#[serde_as]
#[derive(Debug, Copy, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Dependency {
    pub channel_id: Hash256,
    #[serde_as(as = "U128Hex")]
    pub nonce: u128,
}

/// A provisional signed state awaiting the preimage of `secret_hash`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PendingConditionalUpdate {
    pub channel_id: Hash256,
    pub role: HopRole,
    pub balances: Balances,
    #[serde_as(as = "U128Hex")]
    pub nonce: u128,
    pub action: Action,
    pub actor: Option<Principal>,
    #[serde_as(as = "U128Hex")]
    pub amount: u128,
    pub secret_hash: Hash256,
    pub hub_signature: Signature,
    /// Absent on an outbound hop until the receiver reveals the secret.
    pub counterparty_signature: Option<Signature>,
    pub depends_on: Option<Dependency>,
    /// Settlement-layer height at which the entry lapses.
    pub expiry: u64,
}

impl PendingConditionalUpdate {
    pub fn message(&self, key: &ChannelKey) -> StateMessage {
        StateMessage {
            key: key.clone(),
            balances: self.balances,
            nonce: self.nonce,
            action: self.action,
            actor: self.actor.clone(),
            secret_hash: Some(self.secret_hash),
        }
    }

    pub fn is_expired(&self, height: u64) -> bool {
        height >= self.expiry
    }
}

/// Fee policy and expiry margin applied when forwarding.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RoutingPolicy {
    pub base_fee: u128,
    pub fee_rate_per_million: u128,
    pub expiry_safety_margin: u64,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            base_fee: DEFAULT_ROUTING_BASE_FEE.into(),
            fee_rate_per_million: DEFAULT_ROUTING_FEE_RATE_PER_MILLION.into(),
            expiry_safety_margin: DEFAULT_EXPIRY_SAFETY_MARGIN_BLOCKS,
        }
    }
}

impl RoutingPolicy {
    /// `base + amount * rate / 1_000_000`, `None` on overflow.
    pub fn fee_for(&self, amount: u128) -> Option<u128> {
        amount
            .checked_mul(self.fee_rate_per_million)
            .map(|v| v / 1_000_000)
            .and_then(|v| v.checked_add(self.base_fee))
    }
}

pub trait ConditionalStore {
    fn get_pending_conditional(&self, channel_id: &Hash256)
        -> Result<Option<PendingConditionalUpdate>>;

    fn get_channel_ids_by_secret_hash(&self, secret_hash: &Hash256) -> Result<Vec<Hash256>>;

    fn get_pending_conditionals(&self) -> Result<Vec<PendingConditionalUpdate>>;
}
