use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use tracing::{debug, error, info, warn};

use super::{ConditionalStore, Dependency, HopRole, PendingConditionalUpdate, RoutingPolicy};
use crate::channel::{
    Action, Balances, ChannelKey, ChannelState, ChannelStore, Countersigner, SignedState,
    StateMessage, UpdateValidator, ValidatedUpdate,
};
use crate::primitives::{Hash256, Principal, Signature};
use crate::serde_utils::U128Hex;
use crate::store::{Store, StoreTransaction};
use crate::{Error, Result};

/// Result of forwarding a conditional transfer.
#[derive(Debug, Clone)]
pub struct RoutedTransfer {
    /// Hub signature over the inbound conditional state.
    pub hub_signature: Signature,
    pub inbound: PendingConditionalUpdate,
    pub outbound: PendingConditionalUpdate,
}

/// An outbound hop paid out while its inbound hop lapsed: the hub carries the
/// forwarded amount as a loss.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct LossReport {
    pub channel_id: Hash256,
    pub outbound_channel_id: Option<Hash256>,
    pub secret_hash: Hash256,
    #[serde_as(as = "U128Hex")]
    pub amount: u128,
    pub expiry: u64,
    pub height: u64,
}

impl From<&LossReport> for Error {
    fn from(report: &LossReport) -> Self {
        Error::ConditionalUpdateExpired {
            channel_id: report.channel_id,
            secret_hash: report.secret_hash,
            reason: format!(
                "inbound hop expired at {} (height {}) after its outbound hop was paid",
                report.expiry, report.height
            ),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RevealOutcome {
    pub finalized: Vec<SignedState>,
    /// Channels whose entry matched but is still waiting, on the next hop's
    /// signature or on the dependency's confirmation.
    pub awaiting: Vec<Hash256>,
    pub losses: Vec<LossReport>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SweepReport {
    pub discarded: Vec<Hash256>,
    pub losses: Vec<LossReport>,
}

enum DependencyState {
    Confirmed,
    InFlight,
    Dead,
}

pub struct RoutingCoordinator {
    hub: Principal,
    countersigner: Arc<Countersigner>,
    validator: Arc<UpdateValidator>,
    policy: RoutingPolicy,
}

impl RoutingCoordinator {
    pub fn new(
        countersigner: Arc<Countersigner>,
        validator: Arc<UpdateValidator>,
        policy: RoutingPolicy,
    ) -> Self {
        Self {
            hub: countersigner.principal().clone(),
            countersigner,
            validator,
            policy,
        }
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    /// Key of the channel a conditional transfer is forwarded on.
    pub fn outbound_key(&self, inbound: &ChannelKey, next_hop: &Principal) -> Result<ChannelKey> {
        ChannelKey::new(inbound.asset.clone(), self.hub.clone(), next_hop.clone())
    }

    /// Stage the inbound and outbound pending entries of a validated
    /// conditional transfer. Both channels must be locked by `txn`.
    pub async fn route(
        &self,
        txn: &mut StoreTransaction<'_>,
        update: &ValidatedUpdate,
        height: u64,
    ) -> Result<RoutedTransfer> {
        let inbound = &update.channel;
        if update.message.action != Action::Transfer {
            return Err(Error::InvalidParameter(format!(
                "only transfers are routed, got {}",
                update.message.action.as_ref()
            )));
        }
        let (secret_hash, next_hop) = match (update.message.secret_hash, &update.next_hop) {
            (Some(secret_hash), Some(next_hop)) => (secret_hash, next_hop),
            _ => {
                return Err(Error::InvalidParameter(
                    "a routed transfer needs a secret hash and a next hop".to_string(),
                ))
            }
        };
        let expired = |channel_id: Hash256, reason: String| Error::ConditionalUpdateExpired {
            channel_id,
            secret_hash,
            reason,
        };
        let expiry = update.expiry.ok_or_else(|| {
            Error::InvalidParameter("a conditional transfer needs an expiry height".to_string())
        })?;
        if expiry <= height {
            return Err(expired(
                inbound.id,
                format!("expiry {} is not after current height {}", expiry, height),
            ));
        }
        let outbound_expiry = expiry
            .checked_sub(self.policy.expiry_safety_margin)
            .filter(|e| *e > height)
            .ok_or_else(|| {
                expired(
                    inbound.id,
                    format!(
                        "expiry {} leaves less than {} blocks for the next hop at height {}",
                        expiry, self.policy.expiry_safety_margin, height
                    ),
                )
            })?;
        if next_hop == &update.counterparty {
            return Err(Error::InvalidParameter(
                "next hop must differ from the sender".to_string(),
            ));
        }

        let outbound_key = self.outbound_key(&inbound.key, next_hop)?;
        let outbound = txn
            .get_channel_by_key(&outbound_key)?
            .ok_or_else(|| Error::ChannelNotFound(outbound_key.id().to_string()))?;
        if outbound.state != ChannelState::Open {
            return Err(Error::InvalidChannelState {
                channel_id: outbound.id,
                state: outbound.state,
            });
        }
        if txn.get_pending_conditional(&outbound.id)?.is_some() {
            return Err(Error::ConditionalUpdateInFlight(outbound.id));
        }

        let fee = self.policy.fee_for(update.amount).ok_or_else(|| {
            Error::InvalidParameter(format!("fee for {} is out of range", update.amount))
        })?;
        let forward = update
            .amount
            .checked_sub(fee)
            .filter(|v| *v > 0)
            .ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "amount {} does not cover the routing fee {}",
                    update.amount, fee
                ))
            })?;
        let hub_side = outbound_key
            .side_of(&self.hub)
            .ok_or_else(|| Error::InvalidParameter("hub is not on the outbound channel".to_string()))?;
        let hub_balance = outbound
            .balances
            .get(hub_side)
            .checked_sub(forward)
            .ok_or_else(|| {
                Error::invalid_delta(
                    &outbound,
                    format!("hub can not forward {} on the outbound channel", forward),
                )
            })?;
        let next_hop_balance = outbound
            .balances
            .get(hub_side.other())
            .checked_add(forward)
            .ok_or_else(|| Error::invalid_delta(&outbound, "next hop balance out of range"))?;
        let outbound_nonce = outbound
            .nonce
            .checked_add(1)
            .ok_or_else(|| Error::invalid_delta(&outbound, "nonce exhausted"))?;

        let outbound_message = StateMessage {
            key: outbound_key,
            balances: Balances::from_sides(hub_side, hub_balance, next_hop_balance),
            nonce: outbound_nonce,
            action: Action::Transfer,
            actor: Some(self.hub.clone()),
            secret_hash: Some(secret_hash),
        };
        let outbound_signature = self.countersigner.sign(&outbound_message).await?;
        let inbound_signature = self.countersigner.sign(&update.message).await?;

        let outbound_pending = PendingConditionalUpdate {
            channel_id: outbound.id,
            role: HopRole::Outbound,
            balances: outbound_message.balances,
            nonce: outbound_nonce,
            action: Action::Transfer,
            actor: outbound_message.actor.clone(),
            amount: forward,
            secret_hash,
            hub_signature: outbound_signature,
            counterparty_signature: None,
            depends_on: None,
            expiry: outbound_expiry,
        };
        let inbound_pending = PendingConditionalUpdate {
            channel_id: inbound.id,
            role: HopRole::Inbound,
            balances: update.message.balances,
            nonce: update.message.nonce,
            action: update.message.action,
            actor: update.message.actor.clone(),
            amount: update.amount,
            secret_hash,
            hub_signature: inbound_signature,
            counterparty_signature: Some(update.counterparty_signature),
            depends_on: Some(Dependency {
                channel_id: outbound.id,
                nonce: outbound_nonce,
            }),
            expiry,
        };
        txn.put_pending_conditional(&outbound_pending)?;
        txn.put_pending_conditional(&inbound_pending)?;
        info!(
            "Routing {} locked on {} from channel {} to channel {} (fee {}, expiries {}/{})",
            forward, secret_hash, inbound.id, outbound.id, fee, expiry, outbound_expiry
        );
        Ok(RoutedTransfer {
            hub_signature: inbound_signature,
            inbound: inbound_pending,
            outbound: outbound_pending,
        })
    }

    /// The dependency is confirmed only by a signed state at its nonce that
    /// carries the same lock. Any other state at or past that nonce was
    /// reached without the transfer.
    fn dependency_state<S>(
        &self,
        store: &S,
        dependency: &Dependency,
        secret_hash: &Hash256,
        height: u64,
    ) -> Result<DependencyState>
    where
        S: ChannelStore + ConditionalStore,
    {
        let confirmed = store
            .get_signed_state(&dependency.channel_id)?
            .map_or(false, |state| {
                state.nonce == dependency.nonce && state.secret_hash == Some(*secret_hash)
            });
        if confirmed {
            return Ok(DependencyState::Confirmed);
        }
        let superseded = store
            .get_channel(&dependency.channel_id)?
            .map_or(false, |channel| channel.nonce >= dependency.nonce);
        if superseded {
            return Ok(DependencyState::Dead);
        }
        Ok(match store.get_pending_conditional(&dependency.channel_id)? {
            Some(pending) if pending.nonce == dependency.nonce && !pending.is_expired(height) => {
                DependencyState::InFlight
            }
            _ => DependencyState::Dead,
        })
    }

    fn loss(&self, pending: &PendingConditionalUpdate, height: u64) -> LossReport {
        let report = LossReport {
            channel_id: pending.channel_id,
            outbound_channel_id: pending.depends_on.map(|d| d.channel_id),
            secret_hash: pending.secret_hash,
            amount: pending.amount,
            expiry: pending.expiry,
            height,
        };
        error!("Routing loss: {}", Error::from(&report));
        report
    }

    /// Resolve every pending entry locked on `sha256(secret)`. The next hop's
    /// signature over the outbound state may accompany the secret.
    pub async fn reveal_secret(
        &self,
        store: &Store,
        secret: Hash256,
        next_hop_signature: Option<Signature>,
        height: u64,
    ) -> Result<RevealOutcome> {
        let secret_hash = Hash256::lock_of(&secret);
        let ids = store.get_channel_ids_by_secret_hash(&secret_hash)?;
        if ids.is_empty() {
            return Err(Error::SecretMismatch(secret_hash));
        }
        let guard = store.lock_channels(&ids).await;
        let mut pendings = Vec::new();
        for id in guard.channel_ids() {
            if let Some(pending) = guard.get_pending_conditional(id)? {
                if pending.secret_hash == secret_hash {
                    pendings.push(pending);
                }
            }
        }
        if pendings.is_empty() {
            return Err(Error::SecretMismatch(secret_hash));
        }
        // Outbound hops first, so their promotion confirms the inbound dependencies.
        pendings.sort_by_key(|p| p.role != HopRole::Outbound);

        let mut txn = guard.begin();
        let mut outcome = RevealOutcome::default();
        let mut confirmed: Vec<Dependency> = Vec::new();
        for pending in pendings {
            let channel = txn
                .get_channel(&pending.channel_id)?
                .ok_or_else(|| Error::ChannelNotFound(pending.channel_id.to_string()))?;
            match pending.role {
                HopRole::Outbound => {
                    if pending.is_expired(height) {
                        return Err(Error::ConditionalUpdateExpired {
                            channel_id: pending.channel_id,
                            secret_hash,
                            reason: format!(
                                "outbound hop expired at {}, current height {}",
                                pending.expiry, height
                            ),
                        });
                    }
                    let signature = match pending.counterparty_signature.or(next_hop_signature) {
                        Some(signature) => signature,
                        None => {
                            debug!(
                                "Secret for {} known, waiting for the next hop's signature on {}",
                                secret_hash, channel.id
                            );
                            outcome.awaiting.push(channel.id);
                            continue;
                        }
                    };
                    let next_hop = channel.key.counterparty_of(&self.hub).ok_or_else(|| {
                        Error::DBInternalError(format!("hub is not on channel {}", channel.id))
                    })?;
                    self.validator
                        .verify_signature(&signature, next_hop, &pending.message(&channel.key))
                        .await?;
                    let state = self
                        .countersigner
                        .promote(&mut txn, &channel, &pending, signature)?;
                    confirmed.push(Dependency {
                        channel_id: state.channel_id,
                        nonce: state.nonce,
                    });
                    outcome.finalized.push(state);
                }
                HopRole::Inbound => {
                    let dependency_met = match &pending.depends_on {
                        None => true,
                        Some(dep) => {
                            confirmed
                                .iter()
                                .any(|c| c.channel_id == dep.channel_id && c.nonce == dep.nonce)
                                || matches!(
                                    self.dependency_state(&*txn, dep, &secret_hash, height)?,
                                    DependencyState::Confirmed
                                )
                        }
                    };
                    if !dependency_met {
                        outcome.awaiting.push(channel.id);
                        continue;
                    }
                    if pending.is_expired(height) {
                        outcome.losses.push(self.loss(&pending, height));
                        txn.delete_pending_conditional(&pending)?;
                        continue;
                    }
                    let signature = pending.counterparty_signature.ok_or_else(|| {
                        Error::DBInternalError(format!(
                            "inbound entry on {} lacks the sender's signature",
                            channel.id
                        ))
                    })?;
                    let state = self
                        .countersigner
                        .promote(&mut txn, &channel, &pending, signature)?;
                    outcome.finalized.push(state);
                }
            }
        }
        txn.commit()?;
        info!(
            "Secret for {} revealed: {} finalized, {} awaiting, {} losses",
            secret_hash,
            outcome.finalized.len(),
            outcome.awaiting.len(),
            outcome.losses.len()
        );
        Ok(outcome)
    }

    /// Discard entries that can no longer resolve at `height`.
    pub async fn sweep_expired(&self, store: &Store, height: u64) -> Result<SweepReport> {
        let pendings = store.get_pending_conditionals()?;
        let expired: Vec<&PendingConditionalUpdate> =
            pendings.iter().filter(|p| p.is_expired(height)).collect();
        if expired.is_empty() {
            return Ok(SweepReport::default());
        }
        let mut ids: Vec<Hash256> = expired.iter().map(|p| p.channel_id).collect();
        for pending in &pendings {
            if let Some(dep) = &pending.depends_on {
                if expired.iter().any(|e| e.channel_id == dep.channel_id) {
                    ids.push(pending.channel_id);
                }
            }
        }

        let guard = store.lock_channels(&ids).await;
        let mut txn = guard.begin();
        let mut report = SweepReport::default();
        for id in guard.channel_ids() {
            let Some(pending) = guard.get_pending_conditional(id)? else {
                continue;
            };
            let discard = match (pending.role, &pending.depends_on) {
                (HopRole::Inbound, Some(dep)) => match self.dependency_state(&*guard, dep, &pending.secret_hash, height)? {
                    DependencyState::Confirmed if pending.is_expired(height) => {
                        report.losses.push(self.loss(&pending, height));
                        true
                    }
                    DependencyState::Confirmed => false,
                    DependencyState::InFlight => pending.is_expired(height),
                    DependencyState::Dead => true,
                },
                _ => pending.is_expired(height),
            };
            if discard {
                warn!(
                    "Discarding {:?} conditional update on {} locked on {}, expiry {} height {}",
                    pending.role, pending.channel_id, pending.secret_hash, pending.expiry, height
                );
                txn.delete_pending_conditional(&pending)?;
                report.discarded.push(pending.channel_id);
            }
        }
        txn.commit()?;
        Ok(report)
    }
}
