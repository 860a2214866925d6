//! Applies settlement-layer events to the channel store, exactly once per
//! event regardless of redelivery.

mod event;
pub use event::{
    parse_batch, Block, ChannelEvent, EventBatch, OnChainChannel, OnChainChannelKey, ParsedEvent,
    RevealSecretEvent, SettlementEvent, KNOWN_EVENTS,
};

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::channel::{
    Action, Channel, ChannelKey, ChannelState, ChannelStore, ClosingClaim, SignedState,
};
use crate::dispute::{mark_accepted, DisputeMonitor, DisputeOutcome};
use crate::primitives::{Hash256, Principal};
use crate::routing::{ConditionalStore, LossReport, RoutingCoordinator};
use crate::store::{Store, StoreTransaction};
use crate::{Error, Result};

pub trait EventCursorStore {
    /// Height of the last fully applied block.
    fn get_event_cursor(&self) -> Result<Option<u64>>;
}

#[derive(Debug, Clone, Serialize)]
pub struct DisputeAlert {
    pub channel_id: Hash256,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<DisputeOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub applied: usize,
    /// Blocks at or below the cursor.
    pub skipped_blocks: usize,
    pub ignored: usize,
    pub malformed: usize,
    pub disputes: Vec<DisputeAlert>,
    pub losses: Vec<LossReport>,
    pub cursor: Option<u64>,
}

enum Effect {
    Applied,
    Ignored,
    /// A counterparty moved the channel to closing.
    Closing(Hash256),
}

pub struct EventReconciler {
    store: Store,
    hub: Principal,
    secret: String,
    disputes: Arc<DisputeMonitor>,
    routing: Arc<RoutingCoordinator>,
    // Batches are applied one at a time, in delivery order.
    batch_lock: Mutex<()>,
}

impl EventReconciler {
    pub fn new(
        store: Store,
        hub: Principal,
        secret: String,
        disputes: Arc<DisputeMonitor>,
        routing: Arc<RoutingCoordinator>,
    ) -> Self {
        Self {
            store,
            hub,
            secret,
            disputes,
            routing,
            batch_lock: Mutex::new(()),
        }
    }

    pub fn authenticate(&self, authorization: Option<&str>) -> Result<()> {
        match authorization {
            Some(value) if !self.secret.is_empty() && value == self.secret => Ok(()),
            _ => Err(Error::Unauthorized),
        }
    }

    /// Authenticate, parse and apply one delivery.
    pub async fn apply_delivery(&self, authorization: Option<&str>, body: &[u8]) -> Result<BatchReport> {
        self.authenticate(authorization)?;
        let batch = parse_batch(body)?;
        self.apply_batch(batch).await
    }

    pub async fn apply_batch(&self, batch: EventBatch) -> Result<BatchReport> {
        let _serial = self.batch_lock.lock().await;
        let mut report = BatchReport {
            cursor: self.store.get_event_cursor()?,
            ..Default::default()
        };
        for block in batch.blocks {
            if report.cursor.is_some_and(|cursor| block.height <= cursor) {
                debug!("Skipping already applied block {}", block.height);
                report.skipped_blocks += 1;
                continue;
            }
            for parsed in block.events {
                let event = match parsed {
                    ParsedEvent::Known(event) => event,
                    ParsedEvent::Malformed { .. } => {
                        report.malformed += 1;
                        continue;
                    }
                    ParsedEvent::Ignored => {
                        report.ignored += 1;
                        continue;
                    }
                };
                match self.apply_event(block.height, &event, &mut report).await {
                    Ok(Effect::Applied) => report.applied += 1,
                    Ok(Effect::Ignored) => report.ignored += 1,
                    Ok(Effect::Closing(channel_id)) => {
                        report.applied += 1;
                        report.disputes.push(self.dispute(&channel_id).await);
                    }
                    Err(err @ Error::DBInternalError(_)) => return Err(err),
                    Err(err) => {
                        warn!(
                            "Skipping {} event in block {}: {}",
                            event.name(),
                            block.height,
                            err
                        );
                        report.malformed += 1;
                    }
                }
            }
            self.set_cursor(block.height).await?;
            report.cursor = Some(block.height);
        }
        info!(
            "Applied event batch: {} applied, {} ignored, {} malformed, {} blocks skipped",
            report.applied, report.ignored, report.malformed, report.skipped_blocks
        );
        Ok(report)
    }

    async fn set_cursor(&self, height: u64) -> Result<()> {
        let guard = self.store.lock_channels(&[]).await;
        let mut txn = guard.begin();
        txn.set_event_cursor(height)?;
        txn.commit()
    }

    async fn dispute(&self, channel_id: &Hash256) -> DisputeAlert {
        match self.disputes.on_closing(channel_id).await {
            Ok(outcome) => DisputeAlert {
                channel_id: *channel_id,
                outcome: Some(outcome),
                error: None,
            },
            Err(err) => {
                error!("Dispute handling for channel {} failed: {}", channel_id, err);
                DisputeAlert {
                    channel_id: *channel_id,
                    outcome: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn apply_event(
        &self,
        height: u64,
        event: &SettlementEvent,
        report: &mut BatchReport,
    ) -> Result<Effect> {
        let channel_event = match event {
            SettlementEvent::RevealSecret(reveal) => {
                return match self
                    .routing
                    .reveal_secret(&self.store, reveal.secret, None, height)
                    .await
                {
                    Ok(outcome) => {
                        report.losses.extend(outcome.losses);
                        Ok(Effect::Applied)
                    }
                    Err(Error::SecretMismatch(_)) => Ok(Effect::Ignored),
                    Err(err) => Err(err),
                };
            }
            other => match other.channel_event() {
                Some(e) => e,
                None => return Ok(Effect::Ignored),
            },
        };

        let key = channel_event.key()?;
        if !key.contains(&self.hub) {
            return Ok(Effect::Ignored);
        }
        let mut lock_ids = vec![key.id()];
        if matches!(
            event,
            SettlementEvent::Deposit(_) | SettlementEvent::Withdraw(_)
        ) {
            // Both hops of a routed transfer, in case the change supersedes one.
            if let Some(pending) = self.store.get_pending_conditional(&key.id())? {
                lock_ids.extend(
                    self.store
                        .get_channel_ids_by_secret_hash(&pending.secret_hash)?,
                );
            }
        }
        let guard = self.store.lock_channels(&lock_ids).await;
        let locked = guard.channel_ids().to_vec();
        let mut txn = guard.begin();
        let current = txn.get_channel(&key.id())?;
        let effect = match event {
            SettlementEvent::FundChannel(e) => self.on_fund(&mut txn, key, current, e)?,
            SettlementEvent::CloseChannel(e) | SettlementEvent::Finalize(e) => {
                self.on_close(&mut txn, key, current, e)?
            }
            SettlementEvent::DisputeClosure(e) => {
                let effect = self.on_close(&mut txn, key.clone(), current, e)?;
                let marked = mark_accepted(&mut txn, &key.id())?;
                if marked > 0 {
                    info!("Dispute on channel {} accepted on chain", key.id());
                    Effect::Applied
                } else {
                    effect
                }
            }
            SettlementEvent::ForceClose(e) | SettlementEvent::ForceCancel(e) => {
                self.on_force_close(&mut txn, key, current, e, height)?
            }
            SettlementEvent::Deposit(e) => {
                self.on_balance_change(&mut txn, key, current, e, Action::Deposit, &locked)?
            }
            SettlementEvent::Withdraw(e) => {
                self.on_balance_change(&mut txn, key, current, e, Action::Withdraw, &locked)?
            }
            SettlementEvent::RevealSecret(_) => Effect::Ignored,
        };
        txn.commit()?;
        Ok(effect)
    }

    fn signed_state(&self, channel: &Channel, event: &ChannelEvent, action: Action) -> Result<Option<SignedState>> {
        let Some((sender_sig, other_sig)) = event.signatures()? else {
            return Ok(None);
        };
        let (hub_signature, counterparty_signature) = if event.sender == self.hub {
            (sender_sig, other_sig)
        } else {
            (other_sig, sender_sig)
        };
        Ok(Some(SignedState {
            channel_id: channel.id,
            balances: channel.balances,
            nonce: channel.nonce,
            action,
            actor: Some(event.sender.clone()),
            secret_hash: None,
            hub_signature,
            counterparty_signature,
        }))
    }

    fn adopt(
        &self,
        txn: &mut StoreTransaction<'_>,
        channel: &mut Channel,
        event: &ChannelEvent,
        action: Action,
    ) -> Result<()> {
        let held_nonce = txn.get_signed_state(&channel.id)?.map(|s| s.nonce);
        channel.balances = event.balances();
        channel.nonce = channel.nonce.max(event.nonce());
        if let Some(expires_at) = event.expires_at() {
            channel.expires_at = Some(expires_at);
        }
        if held_nonce.map_or(true, |held| event.nonce() > held) {
            if let Some(state) = self.signed_state(channel, event, action)? {
                txn.put_signed_state(&state)?;
            }
        }
        Ok(())
    }

    fn on_fund(
        &self,
        txn: &mut StoreTransaction<'_>,
        key: ChannelKey,
        current: Option<Channel>,
        event: &ChannelEvent,
    ) -> Result<Effect> {
        let mut channel = match current {
            None => Channel::new(key, ChannelState::Open),
            Some(channel) if channel.state == ChannelState::Funding => channel,
            Some(channel) if channel.state == ChannelState::Open => {
                let funded = channel
                    .key
                    .side_of(&event.sender)
                    .map_or(true, |side| channel.balances.get(side) != 0);
                if funded {
                    return Ok(Effect::Ignored);
                }
                channel
            }
            Some(_) => return Ok(Effect::Ignored),
        };
        self.adopt(txn, &mut channel, event, Action::Deposit)?;
        channel.transition(ChannelState::Open)?;
        txn.put_channel(&channel)?;
        info!(
            "Channel {} funded by {}, balances ({}, {})",
            channel.id, event.sender, channel.balances.balance_1, channel.balances.balance_2
        );
        Ok(Effect::Applied)
    }

    fn on_close(
        &self,
        txn: &mut StoreTransaction<'_>,
        key: ChannelKey,
        current: Option<Channel>,
        event: &ChannelEvent,
    ) -> Result<Effect> {
        let mut channel = match current {
            None => {
                warn!("Close of unknown channel {}, recording it", key.id());
                Channel::new(key, ChannelState::Funding)
            }
            Some(channel) if matches!(channel.state, ChannelState::Open | ChannelState::Closing) => {
                channel
            }
            Some(_) => return Ok(Effect::Ignored),
        };
        channel.balances = event.balances();
        channel.nonce = channel.nonce.max(event.nonce());
        channel.transition(ChannelState::Closed)?;
        txn.put_channel(&channel)?;
        info!(
            "Channel {} closed at nonce {}, balances ({}, {})",
            channel.id, event.nonce(), channel.balances.balance_1, channel.balances.balance_2
        );
        Ok(Effect::Applied)
    }

    fn on_force_close(
        &self,
        txn: &mut StoreTransaction<'_>,
        key: ChannelKey,
        current: Option<Channel>,
        event: &ChannelEvent,
        height: u64,
    ) -> Result<Effect> {
        let claim = ClosingClaim {
            nonce: event.nonce(),
            balances: event.balances(),
            initiator: event.sender.clone(),
            height,
        };
        match current {
            None => {
                warn!(
                    "Unilateral closure of unknown channel {} by {}, recording it",
                    key.id(),
                    event.sender
                );
                let mut channel = Channel::with_state(
                    key,
                    event.balances(),
                    event.nonce(),
                    event.expires_at(),
                    ChannelState::Closing,
                );
                channel.closing_claim = Some(claim);
                txn.put_channel(&channel)?;
                Ok(Effect::Applied)
            }
            Some(mut channel) if channel.state == ChannelState::Open => {
                channel.transition(ChannelState::Closing)?;
                channel.closing_claim = Some(claim);
                txn.put_channel(&channel)?;
                info!(
                    "Channel {} closing by {} at nonce {} (held nonce {})",
                    channel.id, event.sender, event.nonce(), channel.nonce
                );
                if event.sender == self.hub {
                    Ok(Effect::Applied)
                } else {
                    Ok(Effect::Closing(channel.id))
                }
            }
            Some(channel) => {
                debug!(
                    "Ignoring closure of channel {} in state {:?}",
                    channel.id, channel.state
                );
                Ok(Effect::Ignored)
            }
        }
    }

    fn on_balance_change(
        &self,
        txn: &mut StoreTransaction<'_>,
        key: ChannelKey,
        current: Option<Channel>,
        event: &ChannelEvent,
        action: Action,
        locked: &[Hash256],
    ) -> Result<Effect> {
        let mut channel = match current {
            None => Channel::new(key, ChannelState::Open),
            Some(channel) if event.nonce() <= channel.nonce => return Ok(Effect::Ignored),
            Some(channel) if matches!(channel.state, ChannelState::Open | ChannelState::Funding) => {
                channel
            }
            Some(_) => return Ok(Effect::Ignored),
        };
        self.adopt(txn, &mut channel, event, action)?;
        channel.transition(ChannelState::Open)?;
        txn.put_channel(&channel)?;
        self.discard_superseded(txn, &channel.id, locked)?;
        info!(
            "Channel {} {} on chain at nonce {}, balances ({}, {})",
            channel.id,
            action.as_ref(),
            channel.nonce,
            channel.balances.balance_1,
            channel.balances.balance_2
        );
        Ok(Effect::Applied)
    }

    /// Drop the pending entry on a channel whose state changed on chain, and
    /// the other hop of the same transfer when its channel is in `locked`.
    fn discard_superseded(
        &self,
        txn: &mut StoreTransaction<'_>,
        channel_id: &Hash256,
        locked: &[Hash256],
    ) -> Result<()> {
        let Some(pending) = txn.get_pending_conditional(channel_id)? else {
            return Ok(());
        };
        warn!(
            "On-chain state of channel {} supersedes its {:?} conditional update locked on {}",
            channel_id, pending.role, pending.secret_hash
        );
        txn.delete_pending_conditional(&pending)?;
        for id in locked.iter().filter(|id| *id != channel_id) {
            let Some(other) = txn.get_pending_conditional(id)? else {
                continue;
            };
            let linked = other.secret_hash == pending.secret_hash
                && (other.depends_on.map(|d| d.channel_id) == Some(*channel_id)
                    || pending.depends_on.map(|d| d.channel_id) == Some(*id));
            if linked {
                warn!(
                    "Discarding {:?} conditional update on {} along with it",
                    other.role, id
                );
                txn.delete_pending_conditional(&other)?;
            }
        }
        Ok(())
    }
}
