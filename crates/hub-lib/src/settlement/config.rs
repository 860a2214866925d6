use clap_serde_derive::ClapSerde;

pub const DEFAULT_SETTLEMENT_RPC_URL: &str = "http://127.0.0.1:3999";

// Use prefix `settlement-`/`SETTLEMENT_`
#[derive(ClapSerde, Debug, Clone)]
pub struct SettlementConfig {
    #[default(DEFAULT_SETTLEMENT_RPC_URL.to_string())]
    #[arg(
        name = "SETTLEMENT_RPC_URL",
        long = "settlement-rpc-url",
        env,
        help = format!("settlement gateway rpc endpoint, default is {}", DEFAULT_SETTLEMENT_RPC_URL)
    )]
    pub rpc_url: String,
}
