use std::sync::Arc;

use jsonrpsee::proc_macros::rpc;
use jsonrpsee::types::ErrorObjectOwned;
use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::dispute::DisputeRecord;
use crate::hub::{ChannelRegistration, HubService, SweepSummary};
use crate::primitives::Hash256;

use super::channel::ListChannelsResult;

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ListDisputesParams {
    /// Restrict to one channel.
    pub channel_id: Option<Hash256>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ListDisputesResult {
    pub disputes: Vec<DisputeRecord>,
}

/// RPC module for the hub operator.
#[rpc(server)]
trait OperatorRpc {
    /// List every channel the hub is a party to.
    #[method(name = "list_all_channels")]
    async fn list_all_channels(&self) -> Result<ListChannelsResult, ErrorObjectOwned>;

    /// Register a channel funded out of band.
    #[method(name = "register_channel")]
    async fn register_channel(
        &self,
        params: ChannelRegistration,
    ) -> Result<Channel, ErrorObjectOwned>;

    #[method(name = "list_disputes")]
    async fn list_disputes(
        &self,
        params: ListDisputesParams,
    ) -> Result<ListDisputesResult, ErrorObjectOwned>;

    /// Run one sweep now instead of waiting for the sweeper interval.
    #[method(name = "sweep")]
    async fn sweep(&self) -> Result<SweepSummary, ErrorObjectOwned>;
}

pub struct OperatorRpcServerImpl {
    service: Arc<HubService>,
}

impl OperatorRpcServerImpl {
    pub fn new(service: Arc<HubService>) -> Self {
        OperatorRpcServerImpl { service }
    }
}

#[async_trait::async_trait]
impl OperatorRpcServer for OperatorRpcServerImpl {
    async fn list_all_channels(&self) -> Result<ListChannelsResult, ErrorObjectOwned> {
        let channels = self.service.list_all_channels()?;
        Ok(ListChannelsResult { channels })
    }

    async fn register_channel(
        &self,
        params: ChannelRegistration,
    ) -> Result<Channel, ErrorObjectOwned> {
        Ok(self.service.register_channel(params).await?)
    }

    async fn list_disputes(
        &self,
        params: ListDisputesParams,
    ) -> Result<ListDisputesResult, ErrorObjectOwned> {
        let disputes = self
            .service
            .get_dispute_records(params.channel_id.as_ref())?;
        Ok(ListDisputesResult { disputes })
    }

    async fn sweep(&self) -> Result<SweepSummary, ErrorObjectOwned> {
        Ok(self.service.sweep().await?)
    }
}
