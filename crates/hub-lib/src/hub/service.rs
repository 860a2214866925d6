use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use tracing::{debug, info};

use super::HubConfig;
use crate::channel::{
    Action, Balances, Channel, ChannelKey, ChannelState, ChannelStore, Countersigner, Proposal,
    SignedState, UpdateRequest, UpdateValidator,
};
use crate::dispute::{DisputeMonitor, DisputeOutcome, DisputePolicy, DisputeRecord, DisputeStore};
use crate::oracle::{HubIdentity, SignatureOracle};
use crate::primitives::{AssetId, Hash256, Principal, Signature};
use crate::reconciler::{BatchReport, EventReconciler};
use crate::routing::{
    ConditionalStore, HopRole, PendingConditionalUpdate, RevealOutcome, RoutingCoordinator, RoutingPolicy,
    SweepReport,
};
use crate::serde_utils::U128Hex;
use crate::settlement::SettlementLayer;
use crate::store::Store;
use crate::utils::with_timeout;
use crate::{Error, Result};

/// Tunables of a [`HubService`].
#[derive(Debug, Clone)]
pub struct HubOptions {
    pub external_call_timeout: Duration,
    pub dispute_policy: DisputePolicy,
    pub routing_policy: RoutingPolicy,
    pub webhook_secret: String,
}

impl HubOptions {
    pub fn from_config(config: &HubConfig) -> Self {
        Self {
            external_call_timeout: config.external_call_timeout(),
            dispute_policy: config.dispute_policy(),
            routing_policy: config.routing_policy(),
            webhook_secret: config.webhook_secret.clone().unwrap_or_default(),
        }
    }
}

/// The hub's answer to an accepted update.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct UpdateReceipt {
    pub channel_id: Hash256,
    #[serde_as(as = "U128Hex")]
    pub nonce: u128,
    pub hub_signature: Signature,
    /// Set when the update waits on a secret before it takes effect.
    pub pending: bool,
}

/// A channel funded out of band, registered by the operator.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRegistration {
    pub asset: Option<AssetId>,
    pub principal_1: Principal,
    pub principal_2: Principal,
    #[serde_as(as = "U128Hex")]
    pub balance_1: u128,
    #[serde_as(as = "U128Hex")]
    pub balance_2: u128,
    #[serde_as(as = "U128Hex")]
    pub nonce: u128,
    pub expires_at: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub height: u64,
    pub routing: SweepReport,
    pub disputes: Vec<(Hash256, std::result::Result<DisputeOutcome, String>)>,
}

/// Entry point of every channel operation. Each request runs inside one
/// transactional scope over the channels it touches.
pub struct HubService {
    store: Store,
    hub: Principal,
    validator: Arc<UpdateValidator>,
    countersigner: Arc<Countersigner>,
    routing: Arc<RoutingCoordinator>,
    disputes: Arc<DisputeMonitor>,
    reconciler: Arc<EventReconciler>,
    settlement: Arc<dyn SettlementLayer>,
    timeout: Duration,
}

impl HubService {
    pub fn new(
        store: Store,
        identity: HubIdentity,
        oracle: Arc<dyn SignatureOracle>,
        settlement: Arc<dyn SettlementLayer>,
        options: HubOptions,
    ) -> Self {
        let hub = identity.principal.clone();
        let timeout = options.external_call_timeout;
        let validator = Arc::new(UpdateValidator::new(hub.clone(), oracle.clone(), timeout));
        let countersigner = Arc::new(Countersigner::new(identity, oracle, timeout));
        let routing = Arc::new(RoutingCoordinator::new(
            countersigner.clone(),
            validator.clone(),
            options.routing_policy,
        ));
        let disputes = Arc::new(DisputeMonitor::new(
            store.clone(),
            hub.clone(),
            settlement.clone(),
            options.dispute_policy,
        ));
        let reconciler = Arc::new(EventReconciler::new(
            store.clone(),
            hub.clone(),
            options.webhook_secret,
            disputes.clone(),
            routing.clone(),
        ));
        Self {
            store,
            hub,
            validator,
            countersigner,
            routing,
            disputes,
            reconciler,
            settlement,
            timeout,
        }
    }

    pub fn hub(&self) -> &Principal {
        &self.hub
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn reconciler(&self) -> &Arc<EventReconciler> {
        &self.reconciler
    }

    async fn current_height(&self) -> Result<u64> {
        with_timeout(
            self.timeout,
            "settlement layer",
            self.settlement.current_height(),
        )
        .await
    }

    /// Validate, countersign and persist an off-chain update.
    pub async fn submit_update(&self, request: UpdateRequest) -> Result<UpdateReceipt> {
        let proposal = self.validator.propose(&request)?;
        let channel_id = proposal.key.id();
        let routed = request.action == Action::Transfer
            && request.secret_hash.is_some()
            && request.next_hop.is_some();
        let mut lock_ids = vec![channel_id];
        if let (true, Some(next_hop)) = (routed, &request.next_hop) {
            lock_ids.push(self.routing.outbound_key(&proposal.key, next_hop)?.id());
        }
        let guard = self.store.lock_channels(&lock_ids).await;

        if let Some(message) = proposal.message(&request) {
            if let Some(hub_signature) =
                self.countersigner
                    .existing_signature(&*guard, &message, &request.signature)?
            {
                debug!(
                    "Update on channel {} at nonce {} already committed",
                    channel_id, request.nonce
                );
                return Ok(UpdateReceipt {
                    channel_id,
                    nonce: request.nonce,
                    hub_signature,
                    pending: false,
                });
            }
        }

        if let Some(hub_signature) = self.staged_signature(&*guard, &proposal, &request)? {
            debug!(
                "Conditional update on channel {} at nonce {} already staged",
                channel_id, request.nonce
            );
            return Ok(UpdateReceipt {
                channel_id,
                nonce: request.nonce,
                hub_signature,
                pending: true,
            });
        }

        let update = self.validator.check(&*guard, proposal, &request)?;
        self.validator.verify(&update).await?;

        let mut txn = guard.begin();
        let receipt = if update.is_conditional() {
            let height = self.current_height().await?;
            let routed = self.routing.route(&mut txn, &update, height).await?;
            UpdateReceipt {
                channel_id,
                nonce: update.message.nonce,
                hub_signature: routed.hub_signature,
                pending: true,
            }
        } else {
            let state = self.countersigner.finalize(&mut txn, &update).await?;
            UpdateReceipt {
                channel_id,
                nonce: state.nonce,
                hub_signature: state.hub_signature,
                pending: false,
            }
        };
        txn.commit()?;
        Ok(receipt)
    }

    /// Hub signature of an inbound entry already staged for exactly this request.
    fn staged_signature<S: ConditionalStore>(
        &self,
        store: &S,
        proposal: &Proposal,
        request: &UpdateRequest,
    ) -> Result<Option<Signature>> {
        let message = match proposal.message(request) {
            Some(message) if message.secret_hash.is_some() => message,
            _ => return Ok(None),
        };
        Ok(store
            .get_pending_conditional(&proposal.key.id())?
            .filter(|pending| {
                pending.role == HopRole::Inbound
                    && Some(pending.expiry) == request.expiry
                    && pending.counterparty_signature.as_ref() == Some(&request.signature)
                    && pending.message(&proposal.key) == message
            })
            .map(|pending| pending.hub_signature))
    }

    pub fn get_channel(&self, channel_id: &Hash256) -> Result<Channel> {
        self.store
            .get_channel(channel_id)?
            .ok_or_else(|| Error::ChannelNotFound(channel_id.to_string()))
    }

    pub fn get_signed_state(&self, channel_id: &Hash256) -> Result<Option<SignedState>> {
        self.store.get_signed_state(channel_id)
    }

    pub fn get_conditional_update(
        &self,
        channel_id: &Hash256,
    ) -> Result<Option<PendingConditionalUpdate>> {
        self.store.get_pending_conditional(channel_id)
    }

    pub fn get_dispute_records(&self, channel_id: Option<&Hash256>) -> Result<Vec<DisputeRecord>> {
        self.store.get_dispute_records(channel_id)
    }

    pub fn list_channels(&self, principal: &Principal) -> Result<Vec<Channel>> {
        let mut channels = self.store.get_channels_by_principal(principal)?;
        channels.retain(|c| c.key.contains(&self.hub));
        Ok(channels)
    }

    pub fn list_all_channels(&self) -> Result<Vec<Channel>> {
        let mut channels = self.store.get_channels()?;
        channels.retain(|c| c.key.contains(&self.hub));
        Ok(channels)
    }

    /// Register a channel funded out of band. Fails if a row exists for the key.
    pub async fn register_channel(&self, registration: ChannelRegistration) -> Result<Channel> {
        let key = ChannelKey::new(
            registration.asset,
            registration.principal_1.clone(),
            registration.principal_2,
        )?;
        if !key.contains(&self.hub) {
            return Err(Error::InvalidParameter(format!(
                "channel {} <-> {} does not involve the hub",
                key.principal_1, key.principal_2
            )));
        }
        let balances = if key.principal_1 == registration.principal_1 {
            Balances::new(registration.balance_1, registration.balance_2)
        } else {
            Balances::new(registration.balance_2, registration.balance_1)
        };
        if balances.total().is_none() {
            return Err(Error::InvalidParameter("channel total out of range".to_string()));
        }
        let guard = self.store.lock_channels(&[key.id()]).await;
        if guard.get_channel(&key.id())?.is_some() {
            return Err(Error::InvalidParameter(format!(
                "channel {} already exists",
                key.id()
            )));
        }
        let channel = Channel::with_state(
            key,
            balances,
            registration.nonce,
            registration.expires_at,
            ChannelState::Open,
        );
        let mut txn = guard.begin();
        txn.put_channel(&channel)?;
        txn.commit()?;
        info!("Registered channel {}", channel.id);
        Ok(channel)
    }

    pub async fn reveal_secret(
        &self,
        secret: Hash256,
        next_hop_signature: Option<Signature>,
    ) -> Result<RevealOutcome> {
        let height = self.current_height().await?;
        self.routing
            .reveal_secret(&self.store, secret, next_hop_signature, height)
            .await
    }

    pub async fn apply_event_delivery(
        &self,
        authorization: Option<&str>,
        body: &[u8],
    ) -> Result<BatchReport> {
        self.reconciler.apply_delivery(authorization, body).await
    }

    /// Reap expired conditional updates and resume unfinished disputes.
    pub async fn sweep(&self) -> Result<SweepSummary> {
        let height = self.current_height().await?;
        let routing = self.routing.sweep_expired(&self.store, height).await?;
        let disputes = self
            .disputes
            .retry_pending()
            .await?
            .into_iter()
            .map(|(id, outcome)| (id, outcome.map_err(|e| e.to_string())))
            .collect();
        Ok(SweepSummary {
            height,
            routing,
            disputes,
        })
    }
}
