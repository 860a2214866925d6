use std::{fs::File, io::BufReader, path::PathBuf, process::exit};

use clap::CommandFactory;
use clap_serde_derive::{
    clap::{self, Parser},
    ClapSerde,
};
use home::home_dir;
use serde::Deserialize;

use crate::hub::HubConfig;
use crate::rpc::RpcConfig;
use crate::settlement::SettlementConfig;

const DEFAULT_BASE_DIR_NAME: &str = ".flowhub";
const DEFAULT_CONFIG_FILE_NAME: &str = "config.yml";
const DEFAULT_HUB_DIR_NAME: &str = "hub";

fn get_base_dir() -> PathBuf {
    let mut path = home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(DEFAULT_BASE_DIR_NAME);
    path
}

fn get_default_config_file() -> PathBuf {
    let mut path = get_base_dir();
    path.push(DEFAULT_CONFIG_FILE_NAME);
    path
}

#[derive(Parser)]
#[command(author, version, about)]
struct Args {
    // Left unset so that `--dir` alone selects `$BASE_DIR/config.yml`.
    /// config file
    #[arg(short, long = "config", help = format!("config file [default: {:?} or $BASE_DIR/config.yml]", get_default_config_file()))]
    config_path: Option<std::path::PathBuf>,

    /// base directory
    #[arg(short = 'd', long = "dir", help = format!("base directory for all [default: {:?}]", get_base_dir()))]
    base_dir: Option<std::path::PathBuf>,

    /// config for the hub (channel ledger, disputes, routing)
    #[command(flatten)]
    pub hub: <HubConfig as ClapSerde>::Opt,

    /// config for the settlement gateway
    #[command(flatten)]
    pub settlement: <SettlementConfig as ClapSerde>::Opt,

    /// config for the rpc and webhook servers
    #[command(flatten)]
    pub rpc: <RpcConfig as ClapSerde>::Opt,
}

#[derive(Deserialize)]
struct SerializedConfig {
    hub: Option<<HubConfig as ClapSerde>::Opt>,
    settlement: Option<<SettlementConfig as ClapSerde>::Opt>,
    rpc: Option<<RpcConfig as ClapSerde>::Opt>,
}

#[derive(Debug)]
pub struct Config {
    pub base_dir: PathBuf,
    pub hub: HubConfig,
    pub settlement: SettlementConfig,
    pub rpc: RpcConfig,
}

pub(crate) fn print_help_and_exit(code: i32) {
    use std::io::IsTerminal;
    if std::io::stdout().is_terminal() {
        let mut cmd = Args::command();
        let _ = cmd.print_help();
    }
    exit(code);
}

impl Config {
    pub fn parse() -> Self {
        let mut args = Args::parse();

        let base_dir = args.base_dir.clone().unwrap_or(get_base_dir());

        let config_file = args
            .config_path
            .or(args.base_dir.map(|x| x.join(DEFAULT_CONFIG_FILE_NAME)))
            .unwrap_or(get_default_config_file());

        let config_from_file = match File::open(&config_file).map(BufReader::new) {
            Ok(reader) => match serde_yaml::from_reader::<_, SerializedConfig>(reader) {
                Ok(config) => Some(config),
                Err(err) => {
                    tracing::error!("Invalid config file {:?}: {}", config_file, err);
                    print_help_and_exit(1);
                    None
                }
            },
            Err(_) => None,
        };

        args.hub.base_dir = Some(Some(base_dir.join(DEFAULT_HUB_DIR_NAME)));

        let (hub, settlement, rpc) = match config_from_file {
            Some(SerializedConfig {
                hub,
                settlement,
                rpc,
            }) => (
                hub.map(|c| HubConfig::from(c).merge(&mut args.hub)),
                settlement.map(|c| SettlementConfig::from(c).merge(&mut args.settlement)),
                rpc.map(|c| RpcConfig::from(c).merge(&mut args.rpc)),
            ),
            None => (None, None, None),
        };
        let hub = hub.unwrap_or_else(|| HubConfig::from(&mut args.hub));
        let settlement = settlement.unwrap_or_else(|| SettlementConfig::from(&mut args.settlement));
        let rpc = rpc.unwrap_or_else(|| RpcConfig::from(&mut args.rpc));

        if hub.principal.is_empty() {
            tracing::error!("The hub principal must be configured");
            print_help_and_exit(1)
        }

        Self {
            base_dir,
            hub,
            settlement,
            rpc,
        }
    }
}
