mod config;
pub use config::{
    HubConfig, DEFAULT_CHAIN_ID, DEFAULT_DOMAIN_NAME, DEFAULT_DOMAIN_VERSION,
    DEFAULT_EXTERNAL_CALL_TIMEOUT_MILLIS, DEFAULT_SIGNATURE_ORACLE, DEFAULT_SWEEP_INTERVAL_SECONDS,
};
mod service;
pub use service::{ChannelRegistration, HubOptions, HubService, SweepSummary, UpdateReceipt};
mod sweeper;
pub use sweeper::{SweeperActor, SweeperMessage};

use std::sync::Arc;

use ractor::{Actor, ActorCell, ActorRef};
use tracing::info;

use crate::oracle::{GatewayOracle, HubIdentity, LocalOracle, SignatureOracle};
use crate::settlement::{GatewaySettlement, SettlementConfig, SettlementLayer};
use crate::store::Store;
use crate::{Error, Result};

/// Build the oracle selected by `config`.
pub fn build_oracle(
    config: &HubConfig,
    settlement: &SettlementConfig,
    identity: &HubIdentity,
) -> Result<Arc<dyn SignatureOracle>> {
    match config.signature_oracle.as_str() {
        "gateway" => Ok(Arc::new(GatewayOracle::new(
            &settlement.rpc_url,
            config.external_call_timeout(),
            config.signing_domain(),
        )?)),
        "local" => {
            let oracle = LocalOracle::new(config.signing_domain());
            oracle.register(identity.principal.clone(), identity.public_key());
            for (principal, key) in config.counterparty_keys()? {
                oracle.register(principal, key);
            }
            Ok(Arc::new(oracle))
        }
        other => Err(Error::InvalidParameter(format!(
            "unknown signature oracle {}",
            other
        ))),
    }
}

/// Wire the hub service from configuration and start its sweeper under
/// `root`.
pub async fn start_hub(
    config: &HubConfig,
    settlement_config: &SettlementConfig,
    store: Store,
    root: ActorCell,
) -> Result<(Arc<HubService>, ActorRef<SweeperMessage>)> {
    let identity = HubIdentity::new(config.principal()?, config.read_secret_key()?);
    let oracle = build_oracle(config, settlement_config, &identity)?;
    let settlement: Arc<dyn SettlementLayer> = Arc::new(GatewaySettlement::new(
        &settlement_config.rpc_url,
        config.external_call_timeout(),
    )?);
    let service = Arc::new(HubService::new(
        store,
        identity,
        oracle,
        settlement,
        HubOptions::from_config(config),
    ));
    let (sweeper, _) = Actor::spawn_linked(
        Some("sweeper".to_string()),
        SweeperActor::new(service.clone()),
        config.sweep_interval(),
        root,
    )
    .await?;
    info!("Hub {} started", service.hub());
    Ok((service, sweeper))
}

#[cfg(test)]
mod tests;
