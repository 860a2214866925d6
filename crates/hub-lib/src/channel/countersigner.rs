use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::{Action, Channel, ChannelState, ChannelStore, SignedState, StateMessage, ValidatedUpdate};
use crate::oracle::{HubIdentity, SignatureOracle};
use crate::primitives::{Principal, Signature};
use crate::routing::PendingConditionalUpdate;
use crate::store::StoreTransaction;
use crate::utils::with_timeout;
use crate::{Error, Result};

/// Produces the hub's signature for validated states and persists them. Only
/// the countersigner and the event reconciler write channel rows.
pub struct Countersigner {
    identity: HubIdentity,
    oracle: Arc<dyn SignatureOracle>,
    timeout: Duration,
}

impl Countersigner {
    pub fn new(identity: HubIdentity, oracle: Arc<dyn SignatureOracle>, timeout: Duration) -> Self {
        Self {
            identity,
            oracle,
            timeout,
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.identity.principal
    }

    /// The hub signature of an already committed identical tuple, if any.
    pub fn existing_signature<S: ChannelStore>(
        &self,
        store: &S,
        message: &StateMessage,
        counterparty_signature: &Signature,
    ) -> Result<Option<Signature>> {
        Ok(store
            .get_signed_state(&message.key.id())?
            .filter(|state| {
                state.commits_to(message) && state.counterparty_signature == *counterparty_signature
            })
            .map(|state| state.hub_signature))
    }

    pub async fn sign(&self, message: &StateMessage) -> Result<Signature> {
        with_timeout(
            self.timeout,
            "signature oracle",
            self.oracle.sign(message, self.identity.secret_key()),
        )
        .await
    }

    /// Sign a validated update and stage the new signed state together with
    /// the updated channel row.
    pub async fn finalize(
        &self,
        txn: &mut StoreTransaction<'_>,
        update: &ValidatedUpdate,
    ) -> Result<SignedState> {
        let hub_signature = self.sign(&update.message).await?;
        let message = &update.message;
        let state = SignedState {
            channel_id: update.channel.id,
            balances: message.balances,
            nonce: message.nonce,
            action: message.action,
            actor: message.actor.clone(),
            secret_hash: message.secret_hash,
            hub_signature,
            counterparty_signature: update.counterparty_signature,
        };
        let mut channel = update.channel.clone();
        channel.balances = message.balances;
        channel.nonce = message.nonce;
        if channel.state == ChannelState::Funding && message.action == Action::Deposit {
            channel.transition(ChannelState::Open)?;
        }
        txn.put_signed_state(&state)?;
        txn.put_channel(&channel)?;
        info!(
            "Countersigned {} on channel {} at nonce {}, balances ({}, {})",
            message.action.as_ref(),
            channel.id,
            channel.nonce,
            channel.balances.balance_1,
            channel.balances.balance_2
        );
        Ok(state)
    }

    /// Turn a pending conditional update into the channel's signed state.
    /// `channel` must be the current row, read under the channel lock.
    pub fn promote(
        &self,
        txn: &mut StoreTransaction<'_>,
        channel: &Channel,
        pending: &PendingConditionalUpdate,
        counterparty_signature: Signature,
    ) -> Result<SignedState> {
        if pending.nonce <= channel.nonce {
            return Err(Error::stale_nonce(channel));
        }
        let state = SignedState {
            channel_id: channel.id,
            balances: pending.balances,
            nonce: pending.nonce,
            action: pending.action,
            actor: pending.actor.clone(),
            secret_hash: Some(pending.secret_hash),
            hub_signature: pending.hub_signature,
            counterparty_signature,
        };
        let mut channel = channel.clone();
        channel.balances = pending.balances;
        channel.nonce = pending.nonce;
        txn.put_signed_state(&state)?;
        txn.put_channel(&channel)?;
        txn.delete_pending_conditional(pending)?;
        debug!(
            "Promoted {:?} conditional update on channel {} to nonce {}",
            pending.role, channel.id, channel.nonce
        );
        Ok(state)
    }
}
