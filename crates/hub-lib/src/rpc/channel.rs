use std::sync::Arc;

use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::channel::{Action, Channel, SignedState, UpdateRequest};
use crate::hub::{HubService, UpdateReceipt};
use crate::primitives::{AssetId, Hash256, Principal, Signature};
use crate::routing::{PendingConditionalUpdate, RevealOutcome};
use crate::serde_utils::{U128Hex, U64Hex};

/// An off-chain balance update signed by the counterparty.
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UpdateParams {
    /// The token contract, omitted for the native asset.
    pub asset: Option<AssetId>,
    pub principal_1: Principal,
    pub principal_2: Principal,
    /// Proposed balances, in the order the principals are given. Negative
    /// values are accepted on the wire and rejected by validation.
    pub balance_1: i128,
    pub balance_2: i128,
    #[serde_as(as = "U128Hex")]
    pub nonce: u128,
    #[serde_as(as = "Option<U128Hex>")]
    #[serde(default)]
    pub amount: Option<u128>,
    /// The counterparty's signature over the proposed state.
    pub signature: Signature,
    /// Hash-lock of a conditional transfer.
    pub secret_hash: Option<Hash256>,
    /// Principal the conditional transfer is forwarded to.
    pub next_hop: Option<Principal>,
    #[serde_as(as = "Option<U64Hex>")]
    #[serde(default)]
    pub expiry: Option<u64>,
}

impl UpdateParams {
    fn into_request(self, action: Action) -> UpdateRequest {
        UpdateRequest {
            action,
            asset: self.asset,
            principal_1: self.principal_1,
            principal_2: self.principal_2,
            balance_1: self.balance_1,
            balance_2: self.balance_2,
            nonce: self.nonce,
            amount: self.amount.unwrap_or_default(),
            signature: self.signature,
            secret_hash: self.secret_hash,
            next_hop: self.next_hop,
            expiry: self.expiry,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RevealSecretParams {
    /// The preimage of a pending hash-lock.
    pub secret: Hash256,
    /// The next hop's signature over the outbound state, if it has countersigned.
    pub next_hop_signature: Option<Signature>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ListChannelsParams {
    pub principal: Principal,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ListChannelsResult {
    pub channels: Vec<Channel>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GetChannelParams {
    pub channel_id: Hash256,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GetChannelResult {
    pub channel: Channel,
    /// The latest state signed by both parties.
    pub signed_state: Option<SignedState>,
    pub pending: Option<PendingConditionalUpdate>,
}

/// RPC module for channel updates and queries.
#[rpc(server)]
trait ChannelRpc {
    /// Move funds from the counterparty to the hub, optionally hash-locked and
    /// forwarded to a next hop.
    #[method(name = "transfer")]
    async fn transfer(&self, params: UpdateParams) -> Result<UpdateReceipt, ErrorObjectOwned>;

    /// Credit the counterparty with an on-chain deposit.
    #[method(name = "deposit")]
    async fn deposit(&self, params: UpdateParams) -> Result<UpdateReceipt, ErrorObjectOwned>;

    /// Debit the counterparty for an on-chain withdrawal.
    #[method(name = "withdraw")]
    async fn withdraw(&self, params: UpdateParams) -> Result<UpdateReceipt, ErrorObjectOwned>;

    /// Countersign the final state of a cooperative close.
    #[method(name = "close_channel")]
    async fn close_channel(&self, params: UpdateParams)
        -> Result<UpdateReceipt, ErrorObjectOwned>;

    /// Reveal the secret of a pending conditional transfer.
    #[method(name = "reveal_secret")]
    async fn reveal_secret(
        &self,
        params: RevealSecretParams,
    ) -> Result<RevealOutcome, ErrorObjectOwned>;

    /// List the hub's channels with a principal.
    #[method(name = "list_channels")]
    async fn list_channels(
        &self,
        params: ListChannelsParams,
    ) -> Result<ListChannelsResult, ErrorObjectOwned>;

    #[method(name = "get_channel")]
    async fn get_channel(
        &self,
        params: GetChannelParams,
    ) -> Result<GetChannelResult, ErrorObjectOwned>;
}

pub struct ChannelRpcServerImpl {
    service: Arc<HubService>,
}

impl ChannelRpcServerImpl {
    pub fn new(service: Arc<HubService>) -> Self {
        ChannelRpcServerImpl { service }
    }

    async fn submit(
        &self,
        action: Action,
        params: UpdateParams,
    ) -> Result<UpdateReceipt, ErrorObjectOwned> {
        Ok(self
            .service
            .submit_update(params.into_request(action))
            .await?)
    }
}

#[async_trait::async_trait]
impl ChannelRpcServer for ChannelRpcServerImpl {
    async fn transfer(&self, params: UpdateParams) -> Result<UpdateReceipt, ErrorObjectOwned> {
        self.submit(Action::Transfer, params).await
    }

    async fn deposit(&self, params: UpdateParams) -> Result<UpdateReceipt, ErrorObjectOwned> {
        self.submit(Action::Deposit, params).await
    }

    async fn withdraw(&self, params: UpdateParams) -> Result<UpdateReceipt, ErrorObjectOwned> {
        self.submit(Action::Withdraw, params).await
    }

    async fn close_channel(
        &self,
        params: UpdateParams,
    ) -> Result<UpdateReceipt, ErrorObjectOwned> {
        self.submit(Action::Close, params).await
    }

    async fn reveal_secret(
        &self,
        params: RevealSecretParams,
    ) -> Result<RevealOutcome, ErrorObjectOwned> {
        Ok(self
            .service
            .reveal_secret(params.secret, params.next_hop_signature)
            .await?)
    }

    async fn list_channels(
        &self,
        params: ListChannelsParams,
    ) -> Result<ListChannelsResult, ErrorObjectOwned> {
        let channels = self.service.list_channels(&params.principal)?;
        Ok(ListChannelsResult { channels })
    }

    async fn get_channel(
        &self,
        params: GetChannelParams,
    ) -> Result<GetChannelResult, ErrorObjectOwned> {
        let channel = self.service.get_channel(&params.channel_id)?;
        let signed_state = self.service.get_signed_state(&params.channel_id)?;
        let pending = self.service.get_conditional_update(&params.channel_id)?;
        Ok(GetChannelResult {
            channel,
            signed_state,
            pending,
        })
    }
}
