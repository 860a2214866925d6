pub mod channel;
pub mod config;
pub mod operator;
pub mod webhook;

pub use config::RpcConfig;

pub mod server {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use jsonrpsee::server::{Server, ServerHandle};
    use jsonrpsee::RpcModule;
    use tracing::info;

    use crate::hub::HubService;
    use crate::rpc::channel::{ChannelRpcServer, ChannelRpcServerImpl};
    use crate::rpc::config::RpcConfig;
    use crate::rpc::operator::{OperatorRpcServer, OperatorRpcServerImpl};
    use crate::{Error, Result};

    const DEFAULT_LISTENING_ADDR: &str = "127.0.0.1:8227";

    fn merge_error(err: impl std::fmt::Display) -> Error {
        Error::InvalidParameter(format!("failed to register rpc module: {}", err))
    }

    /// Build the enabled rpc modules over `service`.
    pub fn build_modules(config: &RpcConfig, service: Arc<HubService>) -> Result<RpcModule<()>> {
        let mut modules = RpcModule::new(());
        if config.is_module_enabled("channel") {
            modules
                .merge(ChannelRpcServerImpl::new(service.clone()).into_rpc())
                .map_err(merge_error)?;
        }
        if config.is_module_enabled("operator") {
            modules
                .merge(OperatorRpcServerImpl::new(service).into_rpc())
                .map_err(merge_error)?;
        }
        Ok(modules)
    }

    pub async fn start_rpc(
        config: &RpcConfig,
        service: Arc<HubService>,
    ) -> Result<(ServerHandle, SocketAddr)> {
        let listening_addr = config
            .listening_addr
            .as_deref()
            .unwrap_or(DEFAULT_LISTENING_ADDR);
        let server = Server::builder().build(listening_addr).await?;
        let sockaddr = server.local_addr()?;
        let modules = build_modules(config, service)?;
        let handle = server.start(modules);
        info!("RPC server listening on {}", sockaddr);
        Ok((handle, sockaddr))
    }
}
