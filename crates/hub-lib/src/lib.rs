mod config;
pub use config::Config;

#[cfg(test)]
pub mod tests;

pub mod channel;
pub mod dispute;
pub mod hub;
pub use hub::{start_hub, HubConfig, HubService};
pub mod oracle;
pub mod primitives;
pub mod reconciler;
pub mod routing;
pub mod rpc;
pub mod serde_utils;
pub mod settlement;
pub mod store;

mod errors;
pub use errors::{Error, Result};

pub mod actors;

pub mod tasks;

pub mod utils;

use git_version::git_version;
use primitives::Hash256;
use rand::Rng;

const GIT_VERSION: &str = git_version!(fallback = "unknown");

pub fn get_git_version() -> &'static str {
    GIT_VERSION
}

pub fn get_git_commit_info() -> String {
    format!(
        "{} {}",
        option_env!("GIT_COMMIT_HASH").unwrap_or("unknown"),
        option_env!("GIT_COMMIT_DATE").unwrap_or("unknown")
    )
}

/// A fresh random 32-byte value, used for secrets of conditional transfers.
pub fn gen_rand_sha256_hash() -> Hash256 {
    let mut rng = rand::thread_rng();
    let mut result = [0u8; 32];
    rng.fill(&mut result[..]);
    result.into()
}
