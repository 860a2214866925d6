mod types;
pub use types::{
    Action, Balances, Channel, ChannelKey, ChannelState, ClosingClaim, Side, SignedState,
    StateMessage,
};

mod validator;
pub use validator::{
    balance_rule, BalanceRule, Delta, Proposal, UpdateRequest, UpdateValidator, ValidatedUpdate,
};

mod countersigner;
pub use countersigner::Countersigner;

use crate::primitives::{Hash256, Principal};
use crate::Result;

pub trait ChannelStore {
    fn get_channel(&self, id: &Hash256) -> Result<Option<Channel>>;

    fn get_signed_state(&self, id: &Hash256) -> Result<Option<SignedState>>;

    fn get_channel_ids_by_principal(&self, principal: &Principal) -> Result<Vec<Hash256>>;

    fn get_channels(&self) -> Result<Vec<Channel>>;

    fn get_channel_by_key(&self, key: &ChannelKey) -> Result<Option<Channel>> {
        self.get_channel(&key.id())
    }

    fn get_channels_by_principal(&self, principal: &Principal) -> Result<Vec<Channel>> {
        let mut channels = Vec::new();
        for id in self.get_channel_ids_by_principal(principal)? {
            if let Some(channel) = self.get_channel(&id)? {
                channels.push(channel);
            }
        }
        Ok(channels)
    }
}

#[cfg(test)]
mod tests;
