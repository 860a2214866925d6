use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{
    DisputeRecord, DisputeStatus, DisputeStore, DEFAULT_DISPUTE_MAX_ATTEMPTS,
    DEFAULT_DISPUTE_MAX_BACKOFF_MILLIS, DEFAULT_DISPUTE_RETRY_BASE_MILLIS,
    DEFAULT_DISPUTE_WINDOW_BLOCKS,
};
use crate::channel::{ChannelKey, ChannelState, ChannelStore, ClosingClaim, SignedState};
use crate::primitives::{Hash256, Principal};
use crate::settlement::{DisputeSubmission, SettlementLayer, SubmissionOutcome};
use crate::store::{ChannelGuard, Store, StoreTransaction};
use crate::utils::with_timeout;
use crate::{Error, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DisputePolicy {
    pub window_blocks: u64,
    pub max_attempts: u32,
    /// First backoff delay, doubled on every further attempt.
    pub retry_base: Duration,
    pub max_backoff: Duration,
    pub timeout: Duration,
}

impl Default for DisputePolicy {
    fn default() -> Self {
        Self {
            window_blocks: DEFAULT_DISPUTE_WINDOW_BLOCKS,
            max_attempts: DEFAULT_DISPUTE_MAX_ATTEMPTS,
            retry_base: Duration::from_millis(DEFAULT_DISPUTE_RETRY_BASE_MILLIS),
            max_backoff: Duration::from_millis(DEFAULT_DISPUTE_MAX_BACKOFF_MILLIS),
            timeout: Duration::from_secs(10),
        }
    }
}

impl DisputePolicy {
    pub(crate) fn backoff(&self, attempts: u32) -> Duration {
        self.retry_base
            .saturating_mul(1u32 << attempts.saturating_sub(1).min(16))
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DisputeOutcome {
    /// The held state is not stronger than the claim, or the hub closed.
    NotNeeded,
    Submitted { tx_id: Option<String> },
    /// A previous submission for this closing transition already settled it.
    AlreadyHandled { status: DisputeStatus },
    /// Transient failures used up every attempt. The record stays pending.
    Exhausted { attempts: u32, last_error: String },
}

/// Mark the dispute records of a channel as observed on the settlement layer.
pub fn mark_accepted(txn: &mut StoreTransaction<'_>, channel_id: &Hash256) -> Result<usize> {
    let mut marked = 0;
    for mut record in txn.get_dispute_records(Some(channel_id))? {
        if matches!(record.status, DisputeStatus::Pending | DisputeStatus::Submitted) {
            record.status = DisputeStatus::Accepted;
            txn.put_dispute_record(&record)?;
            marked += 1;
        }
    }
    Ok(marked)
}

/// Closing transitions with a submission under way in this process.
#[derive(Default)]
struct InFlight(Mutex<HashSet<(Hash256, u128)>>);

impl InFlight {
    fn claim(&self, channel_id: Hash256, nonce: u128) -> Option<InFlightSlot<'_>> {
        let mut set = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        set.insert((channel_id, nonce)).then_some(InFlightSlot {
            owner: self,
            key: (channel_id, nonce),
        })
    }
}

struct InFlightSlot<'a> {
    owner: &'a InFlight,
    key: (Hash256, u128),
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        self.owner
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

pub struct DisputeMonitor {
    store: Store,
    hub: Principal,
    settlement: Arc<dyn SettlementLayer>,
    policy: DisputePolicy,
    in_flight: InFlight,
}

impl DisputeMonitor {
    pub fn new(
        store: Store,
        hub: Principal,
        settlement: Arc<dyn SettlementLayer>,
        policy: DisputePolicy,
    ) -> Self {
        Self {
            store,
            hub,
            settlement,
            policy,
            in_flight: InFlight::default(),
        }
    }

    pub fn policy(&self) -> &DisputePolicy {
        &self.policy
    }

    /// Decide on, and if needed submit, a dispute against the closing claim
    /// recorded on `channel_id`. The decision is made and persisted under the
    /// channel lock. Submission runs without it, and a concurrent caller for
    /// the same closing transition gets `AlreadyHandled` with status pending.
    pub async fn on_closing(&self, channel_id: &Hash256) -> Result<DisputeOutcome> {
        let guard = self.store.lock_channels(&[*channel_id]).await;
        let channel = guard
            .get_channel(channel_id)?
            .ok_or_else(|| Error::ChannelNotFound(channel_id.to_string()))?;
        let claim = match (&channel.state, &channel.closing_claim) {
            (ChannelState::Closing, Some(claim)) => claim.clone(),
            _ => {
                debug!("Channel {} is {:?}, nothing to dispute", channel_id, channel.state);
                return Ok(DisputeOutcome::NotNeeded);
            }
        };
        if claim.initiator == self.hub {
            return Ok(DisputeOutcome::NotNeeded);
        }

        let existing = guard.get_dispute_record(channel_id, claim.nonce)?;
        if let Some(record) = &existing {
            if record.status != DisputeStatus::Pending {
                debug!(
                    "Dispute for channel {} against nonce {} already {}",
                    channel_id,
                    claim.nonce,
                    record.status.as_ref()
                );
                return Ok(DisputeOutcome::AlreadyHandled {
                    status: record.status,
                });
            }
        }

        let held = match guard.get_signed_state(channel_id)? {
            Some(held) if self.is_stronger(&channel.key, &held, &claim)? => held,
            _ => {
                info!(
                    "Closure of channel {} at nonce {} matches the hub's state, no dispute",
                    channel_id, claim.nonce
                );
                return Ok(DisputeOutcome::NotNeeded);
            }
        };

        let record = existing.unwrap_or_else(|| DisputeRecord {
            channel_id: *channel_id,
            claimed_nonce: claim.nonce,
            claimed_balances: claim.balances,
            held_nonce: held.nonce,
            deadline: claim.height.saturating_add(self.policy.window_blocks),
            status: DisputeStatus::Pending,
            attempts: 0,
            last_error: None,
            tx_id: None,
        });
        let Some(_slot) = self.in_flight.claim(*channel_id, claim.nonce) else {
            debug!(
                "Dispute for channel {} against nonce {} already being submitted",
                channel_id, claim.nonce
            );
            return Ok(DisputeOutcome::AlreadyHandled {
                status: DisputeStatus::Pending,
            });
        };
        warn!(
            "Channel {} closed by {} at stale nonce {}, hub holds nonce {}, disputing before height {}",
            channel_id, claim.initiator, claim.nonce, held.nonce, record.deadline
        );
        self.write_record(&guard, &record)?;
        drop(guard);

        let submission = DisputeSubmission {
            channel_key: channel.key.clone(),
            state: held,
            claimed_nonce: claim.nonce,
        };
        self.submit_with_retry(record, &submission).await
    }

    /// Held state beats the claim: newer, and no worse for the hub.
    fn is_stronger(&self, key: &ChannelKey, held: &SignedState, claim: &ClosingClaim) -> Result<bool> {
        let hub_side = key
            .side_of(&self.hub)
            .ok_or_else(|| Error::InvalidParameter(format!("hub is not on channel {}", key.id())))?;
        Ok(held.nonce > claim.nonce && held.balances.get(hub_side) >= claim.balances.get(hub_side))
    }

    fn write_record(&self, guard: &ChannelGuard, record: &DisputeRecord) -> Result<()> {
        let mut txn = guard.begin();
        txn.put_dispute_record(record)?;
        txn.commit()
    }

    /// Persist `record` under a fresh channel lock, unless the dispute was
    /// observed on chain meanwhile.
    async fn store_record(&self, record: &DisputeRecord) -> Result<()> {
        let guard = self.store.lock_channels(&[record.channel_id]).await;
        let stored = guard.get_dispute_record(&record.channel_id, record.claimed_nonce)?;
        if stored.is_some_and(|stored| stored.status == DisputeStatus::Accepted) {
            debug!(
                "Dispute for channel {} already accepted on chain, keeping that status",
                record.channel_id
            );
            return Ok(());
        }
        self.write_record(&guard, record)
    }

    async fn expire(&self, record: &mut DisputeRecord, height: u64) -> Error {
        record.status = DisputeStatus::Expired;
        let err = Error::DisputeWindowExpired {
            channel_id: record.channel_id,
            deadline: record.deadline,
            height,
        };
        record.last_error = Some(err.to_string());
        error!("{}", err);
        match self.store_record(record).await {
            Ok(()) => err,
            Err(persist_err) => persist_err,
        }
    }

    async fn submit_with_retry(
        &self,
        mut record: DisputeRecord,
        submission: &DisputeSubmission,
    ) -> Result<DisputeOutcome> {
        loop {
            let accepted = self
                .store
                .get_dispute_record(&record.channel_id, record.claimed_nonce)?
                .is_some_and(|stored| stored.status == DisputeStatus::Accepted);
            if accepted {
                return Ok(DisputeOutcome::AlreadyHandled {
                    status: DisputeStatus::Accepted,
                });
            }
            let result = match with_timeout(
                self.policy.timeout,
                "settlement layer",
                self.settlement.current_height(),
            )
            .await
            {
                Ok(height) if height > record.deadline => {
                    return Err(self.expire(&mut record, height).await);
                }
                Ok(height) => with_timeout(
                    self.policy.timeout,
                    "settlement layer",
                    self.settlement.submit_dispute(submission),
                )
                .await
                .map(|outcome| (height, outcome)),
                Err(err) => Err(err),
            };

            match result {
                Ok((_, SubmissionOutcome::Accepted { tx_id })) => {
                    record.status = DisputeStatus::Submitted;
                    record.attempts += 1;
                    record.tx_id = Some(tx_id.clone());
                    record.last_error = None;
                    self.store_record(&record).await?;
                    info!(
                        "Dispute for channel {} accepted for broadcast as {}",
                        record.channel_id, tx_id
                    );
                    return Ok(DisputeOutcome::Submitted { tx_id: Some(tx_id) });
                }
                Ok((_, SubmissionOutcome::AlreadyAccepted)) => {
                    record.status = DisputeStatus::Submitted;
                    record.attempts += 1;
                    self.store_record(&record).await?;
                    return Ok(DisputeOutcome::Submitted { tx_id: None });
                }
                Ok((height, SubmissionOutcome::WindowClosed)) => {
                    record.attempts += 1;
                    return Err(self.expire(&mut record, height).await);
                }
                Err(err) if err.is_transient() => {
                    record.attempts += 1;
                    record.last_error = Some(err.to_string());
                    if record.attempts >= self.policy.max_attempts {
                        self.store_record(&record).await?;
                        error!(
                            "ALERT: dispute for channel {} failed {} times, last error: {}; left pending",
                            record.channel_id, record.attempts, err
                        );
                        return Ok(DisputeOutcome::Exhausted {
                            attempts: record.attempts,
                            last_error: err.to_string(),
                        });
                    }
                    let delay = self.policy.backoff(record.attempts);
                    warn!(
                        "Dispute submission for channel {} failed (attempt {}): {}, retrying in {:?}",
                        record.channel_id, record.attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    record.last_error = Some(err.to_string());
                    self.store_record(&record).await?;
                    return Err(err);
                }
            }
        }
    }

    /// Resume disputes left pending by exhausted retries or a restart.
    pub async fn retry_pending(&self) -> Result<Vec<(Hash256, Result<DisputeOutcome>)>> {
        let mut retries = Vec::new();
        for record in self.store.get_dispute_records(None)? {
            if record.status != DisputeStatus::Pending {
                continue;
            }
            let still_closing = self
                .store
                .get_channel(&record.channel_id)?
                .and_then(|channel| match channel.state {
                    ChannelState::Closing => channel.closing_claim,
                    _ => None,
                })
                .map_or(false, |claim| claim.nonce == record.claimed_nonce);
            if still_closing {
                retries.push(record.channel_id);
            } else {
                let guard = self.store.lock_channels(&[record.channel_id]).await;
                let Some(mut record) = guard
                    .get_dispute_record(&record.channel_id, record.claimed_nonce)?
                    .filter(|stored| stored.status == DisputeStatus::Pending)
                else {
                    continue;
                };
                record.status = DisputeStatus::Expired;
                record.last_error = Some("closing transition settled before submission".to_string());
                warn!(
                    "Dropping pending dispute for channel {} against nonce {}: channel no longer closing on that claim",
                    record.channel_id, record.claimed_nonce
                );
                self.write_record(&guard, &record)?;
            }
        }
        let outcomes = join_all(retries.iter().map(|id| self.on_closing(id))).await;
        Ok(retries.into_iter().zip(outcomes).collect())
    }
}
