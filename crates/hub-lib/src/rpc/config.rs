use clap_serde_derive::ClapSerde;

const DEFAULT_ENABLED_MODULES: &str = "channel,operator";

/// Flags and env vars are prefixed with `rpc-`/`RPC_`.
#[derive(ClapSerde, Debug, Clone)]
pub struct RpcConfig {
    /// listening address for the json-rpc service [default: 127.0.0.1:8227]
    #[arg(name = "RPC_LISTENING_ADDR", long = "rpc-listening-addr", env)]
    pub listening_addr: Option<String>,

    /// listening address for settlement event deliveries, the webhook is disabled when unset
    #[arg(
        name = "RPC_WEBHOOK_LISTENING_ADDR",
        long = "rpc-webhook-listening-addr",
        env
    )]
    pub webhook_listening_addr: Option<String>,

    #[default(DEFAULT_ENABLED_MODULES.split(',').map(ToString::to_string).collect())]
    #[arg(name = "RPC_ENABLED_MODULES", long = "rpc-enabled-modules", env, value_parser, num_args = 0.., value_delimiter = ',')]
    pub enabled_modules: Vec<String>,
}

impl RpcConfig {
    pub fn is_module_enabled(&self, module: &str) -> bool {
        self.enabled_modules.iter().any(|m| m == module)
    }
}
