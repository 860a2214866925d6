use std::{fs, path::PathBuf, time::Duration};

use clap_serde_derive::ClapSerde;
use secp256k1::{PublicKey, SecretKey};
use tracing::info;

use crate::dispute::{
    DisputePolicy, DEFAULT_DISPUTE_MAX_ATTEMPTS, DEFAULT_DISPUTE_MAX_BACKOFF_MILLIS,
    DEFAULT_DISPUTE_RETRY_BASE_MILLIS, DEFAULT_DISPUTE_WINDOW_BLOCKS,
};
use crate::oracle::SigningDomain;
use crate::primitives::Principal;
use crate::routing::{
    RoutingPolicy, DEFAULT_EXPIRY_SAFETY_MARGIN_BLOCKS, DEFAULT_ROUTING_BASE_FEE,
    DEFAULT_ROUTING_FEE_RATE_PER_MILLION,
};
use crate::{Error, Result};

pub const DEFAULT_CHAIN_ID: u64 = 1;
pub const DEFAULT_DOMAIN_NAME: &str = "flowhub";
pub const DEFAULT_DOMAIN_VERSION: &str = "0.1.0";
pub const DEFAULT_EXTERNAL_CALL_TIMEOUT_MILLIS: u64 = 10_000;
pub const DEFAULT_SWEEP_INTERVAL_SECONDS: u64 = 60;
pub const DEFAULT_SIGNATURE_ORACLE: &str = "gateway";

// Use prefix `hub-`/`HUB_`
#[derive(ClapSerde, Debug, Clone)]
pub struct HubConfig {
    /// hub base directory
    #[arg(
        name = "HUB_BASE_DIR",
        long = "hub-base-dir",
        env,
        help = "base directory for the hub [default: $BASE_DIR/hub]"
    )]
    pub base_dir: Option<PathBuf>,

    /// the hub's settlement-layer principal
    #[arg(name = "HUB_PRINCIPAL", long = "hub-principal", env)]
    pub principal: String,

    #[default(DEFAULT_CHAIN_ID)]
    #[arg(
        name = "HUB_CHAIN_ID",
        long = "hub-chain-id",
        env,
        help = format!("chain id of the signing domain, default is {}", DEFAULT_CHAIN_ID)
    )]
    pub chain_id: u64,

    #[default(DEFAULT_DOMAIN_NAME.to_string())]
    #[arg(
        name = "HUB_DOMAIN_NAME",
        long = "hub-domain-name",
        env,
        help = format!("name of the signing domain, default is {}", DEFAULT_DOMAIN_NAME)
    )]
    pub domain_name: String,

    #[default(DEFAULT_DOMAIN_VERSION.to_string())]
    #[arg(
        name = "HUB_DOMAIN_VERSION",
        long = "hub-domain-version",
        env,
        help = format!("version of the signing domain, default is {}", DEFAULT_DOMAIN_VERSION)
    )]
    pub domain_version: String,

    /// Which signature oracle to use, `gateway` or `local`.
    #[default(DEFAULT_SIGNATURE_ORACLE.to_string())]
    #[arg(
        name = "HUB_SIGNATURE_ORACLE",
        long = "hub-signature-oracle",
        env,
        help = "signature oracle, `gateway` (settlement contract) or `local`, default is gateway"
    )]
    pub signature_oracle: String,

    /// Counterparty keys for the local oracle, as `principal=pubkey-hex`.
    #[default(Vec::new())]
    #[arg(
        name = "HUB_COUNTERPARTY_KEYS",
        long = "hub-counterparty-keys",
        env,
        value_parser,
        num_args = 0..,
        value_delimiter = ','
    )]
    pub counterparty_keys: Vec<String>,

    #[default(DEFAULT_DISPUTE_WINDOW_BLOCKS)]
    #[arg(
        name = "HUB_DISPUTE_WINDOW_BLOCKS",
        long = "hub-dispute-window-blocks",
        env,
        help = format!("blocks after a unilateral closure during which it can be disputed, default is {}", DEFAULT_DISPUTE_WINDOW_BLOCKS)
    )]
    pub dispute_window_blocks: u64,

    #[default(DEFAULT_DISPUTE_MAX_ATTEMPTS)]
    #[arg(
        name = "HUB_DISPUTE_MAX_ATTEMPTS",
        long = "hub-dispute-max-attempts",
        env,
        help = format!("submission attempts per dispute before alerting, default is {}", DEFAULT_DISPUTE_MAX_ATTEMPTS)
    )]
    pub dispute_max_attempts: u32,

    #[default(DEFAULT_DISPUTE_RETRY_BASE_MILLIS)]
    #[arg(
        name = "HUB_DISPUTE_RETRY_BASE_MILLIS",
        long = "hub-dispute-retry-base-millis",
        env,
        help = format!("first retry delay of a dispute submission in milliseconds, doubled per attempt, default is {}", DEFAULT_DISPUTE_RETRY_BASE_MILLIS)
    )]
    pub dispute_retry_base_millis: u64,

    #[default(DEFAULT_DISPUTE_MAX_BACKOFF_MILLIS)]
    #[arg(
        name = "HUB_DISPUTE_MAX_BACKOFF_MILLIS",
        long = "hub-dispute-max-backoff-millis",
        env,
        help = format!("upper bound of the retry delay of a dispute submission in milliseconds, default is {}", DEFAULT_DISPUTE_MAX_BACKOFF_MILLIS)
    )]
    pub dispute_max_backoff_millis: u64,

    #[default(DEFAULT_EXTERNAL_CALL_TIMEOUT_MILLIS)]
    #[arg(
        name = "HUB_EXTERNAL_CALL_TIMEOUT_MILLIS",
        long = "hub-external-call-timeout-millis",
        env,
        help = format!("timeout of oracle and settlement calls in milliseconds, default is {}", DEFAULT_EXTERNAL_CALL_TIMEOUT_MILLIS)
    )]
    pub external_call_timeout_millis: u64,

    #[default(DEFAULT_ROUTING_BASE_FEE)]
    #[arg(
        name = "HUB_ROUTING_BASE_FEE",
        long = "hub-routing-base-fee",
        env,
        help = format!("The base fee charged for each forwarded transfer, default is {}", DEFAULT_ROUTING_BASE_FEE)
    )]
    pub routing_base_fee: u64,

    #[default(DEFAULT_ROUTING_FEE_RATE_PER_MILLION)]
    #[arg(
        name = "HUB_ROUTING_FEE_RATE_PER_MILLION",
        long = "hub-routing-fee-rate-per-million",
        env,
        help = format!("The proportional fee charged per million units forwarded, default is {}", DEFAULT_ROUTING_FEE_RATE_PER_MILLION)
    )]
    pub routing_fee_rate_per_million: u64,

    #[default(DEFAULT_EXPIRY_SAFETY_MARGIN_BLOCKS)]
    #[arg(
        name = "HUB_EXPIRY_SAFETY_MARGIN_BLOCKS",
        long = "hub-expiry-safety-margin-blocks",
        env,
        help = format!("blocks the outbound hop expires before the inbound hop, default is {}", DEFAULT_EXPIRY_SAFETY_MARGIN_BLOCKS)
    )]
    pub expiry_safety_margin_blocks: u64,

    /// shared secret expected in the `Authorization` header of event deliveries
    #[arg(name = "HUB_WEBHOOK_SECRET", long = "hub-webhook-secret", env)]
    pub webhook_secret: Option<String>,

    #[default(DEFAULT_SWEEP_INTERVAL_SECONDS)]
    #[arg(
        name = "HUB_SWEEP_INTERVAL_SECONDS",
        long = "hub-sweep-interval-seconds",
        env,
        help = format!("interval of the expiry and dispute sweeper in seconds, default is {}", DEFAULT_SWEEP_INTERVAL_SECONDS)
    )]
    pub sweep_interval_seconds: u64,
}

impl HubConfig {
    pub fn base_dir(&self) -> Result<&PathBuf> {
        self.base_dir
            .as_ref()
            .ok_or_else(|| Error::InvalidParameter("hub base dir is not set".to_string()))
    }

    pub fn create_base_dir(&self) -> Result<()> {
        let base_dir = self.base_dir()?;
        if !base_dir.exists() {
            fs::create_dir_all(base_dir)?;
        }
        Ok(())
    }

    pub fn store_path(&self) -> Result<PathBuf> {
        let path = self.base_dir()?.join("store");
        if !path.exists() {
            fs::create_dir_all(&path)?;
        }
        Ok(path)
    }

    pub fn principal(&self) -> Result<Principal> {
        if self.principal.is_empty() {
            return Err(Error::InvalidParameter(
                "hub principal is required".to_string(),
            ));
        }
        Ok(Principal::new(self.principal.clone()))
    }

    /// The hub's signing key, stored hex encoded in `$BASE_DIR/hub/key`.
    pub fn read_secret_key(&self) -> Result<SecretKey> {
        self.create_base_dir()?;
        let path = self.base_dir()?.join("key");
        let key_hex = fs::read_to_string(&path)?;
        let key_bin = hex::decode(key_hex.trim()).map_err(|err| {
            Error::InvalidParameter(format!("secret key file {:?} is not hex: {}", path, err))
        })?;
        info!("Loaded hub key from {:?}", path);
        SecretKey::from_slice(&key_bin).map_err(|err| {
            Error::InvalidParameter(format!("invalid secret key data, error: {}", err))
        })
    }

    pub fn signing_domain(&self) -> SigningDomain {
        SigningDomain {
            name: self.domain_name.clone(),
            version: self.domain_version.clone(),
            chain_id: self.chain_id,
        }
    }

    pub fn counterparty_keys(&self) -> Result<Vec<(Principal, PublicKey)>> {
        self.counterparty_keys
            .iter()
            .map(|entry| {
                let (principal, key) = entry.split_once('=').ok_or_else(|| {
                    Error::InvalidParameter(format!(
                        "counterparty key {} is not `principal=pubkey`",
                        entry
                    ))
                })?;
                let bytes = hex::decode(key.trim_start_matches("0x")).map_err(|err| {
                    Error::InvalidParameter(format!("bad public key hex for {}: {}", principal, err))
                })?;
                let key = PublicKey::from_slice(&bytes).map_err(|err| {
                    Error::InvalidParameter(format!("bad public key for {}: {}", principal, err))
                })?;
                Ok((Principal::from(principal), key))
            })
            .collect()
    }

    pub fn external_call_timeout(&self) -> Duration {
        Duration::from_millis(self.external_call_timeout_millis)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn dispute_policy(&self) -> DisputePolicy {
        DisputePolicy {
            window_blocks: self.dispute_window_blocks,
            max_attempts: self.dispute_max_attempts,
            retry_base: Duration::from_millis(self.dispute_retry_base_millis),
            max_backoff: Duration::from_millis(self.dispute_max_backoff_millis),
            timeout: self.external_call_timeout(),
        }
    }

    pub fn routing_policy(&self) -> RoutingPolicy {
        RoutingPolicy {
            base_fee: self.routing_base_fee.into(),
            fee_rate_per_million: self.routing_fee_rate_per_million.into(),
            expiry_safety_margin: self.expiry_safety_margin_blocks,
        }
    }
}
