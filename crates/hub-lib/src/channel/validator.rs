use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::{Action, Balances, Channel, ChannelKey, ChannelState, ChannelStore, Side, StateMessage};
use crate::oracle::SignatureOracle;
use crate::primitives::{AssetId, Hash256, Principal, Signature};
use crate::routing::ConditionalStore;
use crate::utils::with_timeout;
use crate::{Error, Result};

/// An off-chain update as submitted by a counterparty. Principals may come in
/// any order; balances follow the order the principals were given in.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub action: Action,
    pub asset: Option<AssetId>,
    pub principal_1: Principal,
    pub principal_2: Principal,
    pub balance_1: i128,
    pub balance_2: i128,
    pub nonce: u128,
    pub amount: u128,
    pub signature: Signature,
    pub secret_hash: Option<Hash256>,
    pub next_hop: Option<Principal>,
    /// Expiry height of a conditional transfer.
    pub expiry: Option<u64>,
}

/// How one party's balance must move under an action.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Delta {
    Unchanged,
    Credit,
    Debit,
}

impl Delta {
    /// The balance after the move, `None` on overflow or insufficient funds.
    pub fn apply(self, before: u128, amount: u128) -> Option<u128> {
        match self {
            Delta::Unchanged => Some(before),
            Delta::Credit => before.checked_add(amount),
            Delta::Debit => before.checked_sub(amount),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BalanceRule {
    pub hub: Delta,
    pub counterparty: Delta,
}

pub fn balance_rule(action: Action) -> BalanceRule {
    let (hub, counterparty) = match action {
        Action::Deposit => (Delta::Unchanged, Delta::Credit),
        Action::Withdraw => (Delta::Unchanged, Delta::Debit),
        Action::Transfer => (Delta::Credit, Delta::Debit),
        Action::Close => (Delta::Unchanged, Delta::Unchanged),
    };
    BalanceRule { hub, counterparty }
}

/// A request mapped onto its canonical channel key.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub key: ChannelKey,
    pub hub_side: Side,
    pub counterparty: Principal,
    pub balance_1: i128,
    pub balance_2: i128,
}

impl Proposal {
    /// Proposed balances, `None` if either is negative.
    pub fn balances(&self) -> Option<Balances> {
        Some(Balances::new(
            u128::try_from(self.balance_1).ok()?,
            u128::try_from(self.balance_2).ok()?,
        ))
    }

    /// The tuple the counterparty claims to have signed.
    pub fn message(&self, request: &UpdateRequest) -> Option<StateMessage> {
        Some(StateMessage {
            key: self.key.clone(),
            balances: self.balances()?,
            nonce: request.nonce,
            action: request.action,
            actor: Some(self.counterparty.clone()),
            secret_hash: request.secret_hash,
        })
    }
}

/// An update that passed every structural check, pending signature
/// verification.
#[derive(Debug, Clone)]
pub struct ValidatedUpdate {
    /// The channel before the update. Not yet persisted when `is_new`.
    pub channel: Channel,
    pub is_new: bool,
    pub message: StateMessage,
    pub counterparty: Principal,
    pub counterparty_signature: Signature,
    pub amount: u128,
    pub next_hop: Option<Principal>,
    pub expiry: Option<u64>,
}

impl ValidatedUpdate {
    /// A hash-locked transfer to be forwarded to a next hop.
    pub fn is_conditional(&self) -> bool {
        self.message.action == Action::Transfer
            && self.message.secret_hash.is_some()
            && self.next_hop.is_some()
    }
}

pub struct UpdateValidator {
    hub: Principal,
    oracle: Arc<dyn SignatureOracle>,
    timeout: Duration,
}

impl UpdateValidator {
    pub fn new(hub: Principal, oracle: Arc<dyn SignatureOracle>, timeout: Duration) -> Self {
        Self {
            hub,
            oracle,
            timeout,
        }
    }

    pub fn propose(&self, request: &UpdateRequest) -> Result<Proposal> {
        let key = ChannelKey::new(
            request.asset.clone(),
            request.principal_1.clone(),
            request.principal_2.clone(),
        )?;
        let hub_side = key.side_of(&self.hub).ok_or_else(|| {
            Error::InvalidParameter(format!(
                "channel {} <-> {} does not involve the hub",
                request.principal_1, request.principal_2
            ))
        })?;
        let (balance_1, balance_2) = if key.principal_1 == request.principal_1 {
            (request.balance_1, request.balance_2)
        } else {
            (request.balance_2, request.balance_1)
        };
        Ok(Proposal {
            counterparty: key.principal(hub_side.other()).clone(),
            key,
            hub_side,
            balance_1,
            balance_2,
        })
    }

    /// Checks that need no external call. Must run under the channel lock for
    /// the result to stay valid until commit.
    pub fn check<S>(
        &self,
        store: &S,
        proposal: Proposal,
        request: &UpdateRequest,
    ) -> Result<ValidatedUpdate>
    where
        S: ChannelStore + ConditionalStore,
    {
        let (channel, is_new) = match store.get_channel_by_key(&proposal.key)? {
            Some(channel) => (channel, false),
            None if request.action == Action::Deposit => {
                (Channel::new(proposal.key.clone(), ChannelState::Funding), true)
            }
            None => return Err(Error::ChannelNotFound(format!("{}", proposal.key.id()))),
        };

        let accepts = match channel.state {
            ChannelState::Open => true,
            ChannelState::Funding => request.action == Action::Deposit,
            ChannelState::Closing | ChannelState::Closed => false,
        };
        if !accepts {
            return Err(Error::InvalidChannelState {
                channel_id: channel.id,
                state: channel.state,
            });
        }

        if store.get_pending_conditional(&channel.id)?.is_some() {
            return Err(Error::ConditionalUpdateInFlight(channel.id));
        }

        if request.nonce <= channel.nonce {
            return Err(Error::stale_nonce(&channel));
        }

        if request.action == Action::Transfer && request.amount == 0 {
            return Err(Error::InvalidParameter(
                "transfer amount must be positive".to_string(),
            ));
        }

        let carries_lock =
            request.secret_hash.is_some() || request.next_hop.is_some() || request.expiry.is_some();
        if carries_lock && request.action != Action::Transfer {
            return Err(Error::InvalidParameter(format!(
                "{} can not carry a secret hash, next hop or expiry",
                request.action.as_ref()
            )));
        }
        let forwards = request.next_hop.is_some() || request.expiry.is_some();
        if forwards && request.secret_hash.is_none() {
            return Err(Error::InvalidParameter(
                "next hop and expiry need a secret hash".to_string(),
            ));
        }

        let proposed = proposal
            .balances()
            .ok_or_else(|| Error::invalid_delta(&channel, "proposed balance is negative"))?;
        let expected = expected_balances(&channel, proposal.hub_side, request)?;
        if proposed != expected {
            return Err(Error::invalid_delta(
                &channel,
                format!(
                    "{} of {} expects balances ({}, {}), got ({}, {})",
                    request.action.as_ref(),
                    request.amount,
                    expected.balance_1,
                    expected.balance_2,
                    proposed.balance_1,
                    proposed.balance_2
                ),
            ));
        }

        let message = StateMessage {
            key: proposal.key,
            balances: proposed,
            nonce: request.nonce,
            action: request.action,
            actor: Some(proposal.counterparty.clone()),
            secret_hash: request.secret_hash,
        };
        Ok(ValidatedUpdate {
            channel,
            is_new,
            message,
            counterparty: proposal.counterparty,
            counterparty_signature: request.signature,
            amount: request.amount,
            next_hop: request.next_hop.clone(),
            expiry: request.expiry,
        })
    }

    /// Verify the counterparty's signature through the oracle.
    pub async fn verify(&self, update: &ValidatedUpdate) -> Result<()> {
        self.verify_signature(
            &update.counterparty_signature,
            &update.counterparty,
            &update.message,
        )
        .await
    }

    pub async fn verify_signature(
        &self,
        signature: &Signature,
        signer: &Principal,
        message: &StateMessage,
    ) -> Result<()> {
        let valid = with_timeout(
            self.timeout,
            "signature oracle",
            self.oracle.verify(signature, signer, message),
        )
        .await?;
        if valid {
            Ok(())
        } else {
            debug!(
                "Rejecting signature of {} on channel {} nonce {}",
                signer,
                message.key.id(),
                message.nonce
            );
            Err(Error::InvalidSignature(format!(
                "not a signature of {} over the proposed state",
                signer
            )))
        }
    }

    /// Structural checks followed by signature verification.
    pub async fn validate<S>(&self, store: &S, request: &UpdateRequest) -> Result<ValidatedUpdate>
    where
        S: ChannelStore + ConditionalStore,
    {
        let proposal = self.propose(request)?;
        let update = self.check(store, proposal, request)?;
        self.verify(&update).await?;
        Ok(update)
    }
}

fn expected_balances(channel: &Channel, hub_side: Side, request: &UpdateRequest) -> Result<Balances> {
    let rule = balance_rule(request.action);
    let hub_before = channel.balances.get(hub_side);
    let counterparty_before = channel.balances.get(hub_side.other());
    let hub_after = rule
        .hub
        .apply(hub_before, request.amount)
        .ok_or_else(|| Error::invalid_delta(channel, "hub balance out of range"))?;
    let counterparty_after = rule
        .counterparty
        .apply(counterparty_before, request.amount)
        .ok_or_else(|| {
            Error::invalid_delta(
                channel,
                format!(
                    "counterparty balance {} can not cover {}",
                    counterparty_before, request.amount
                ),
            )
        })?;
    let expected = Balances::from_sides(hub_side, hub_after, counterparty_after);
    if expected.total().is_none() {
        return Err(Error::invalid_delta(channel, "channel total out of range"));
    }
    Ok(expected)
}
