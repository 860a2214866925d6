use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use strum::AsRefStr;

use crate::primitives::{sha256, AssetId, Hash256, Principal, Signature};
use crate::serde_utils::U128Hex;
use crate::{Error, Result};

/// The operation a signed state authorizes. The numeric codes are the ones
/// the settlement contract hashes.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, Eq, PartialEq, Hash, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum Action {
    Close = 0,
    Transfer = 1,
    Deposit = 2,
    Withdraw = 3,
}

impl Action {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for Action {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Action::Close),
            1 => Ok(Action::Transfer),
            2 => Ok(Action::Deposit),
            3 => Ok(Action::Withdraw),
            _ => Err(Error::InvalidParameter(format!("unknown action code {}", value))),
        }
    }
}

/// Lifecycle of a channel row.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, Eq, PartialEq, Hash, AsRefStr)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Known off-chain, not yet funded on the settlement layer.
    Funding,
    /// Funded, accepting off-chain updates.
    Open,
    /// A unilateral closure is pending on the settlement layer.
    Closing,
    /// Settled on the settlement layer. Terminal.
    Closed,
}

impl ChannelState {
    pub fn allow_transition(&self, to: &ChannelState) -> bool {
        use ChannelState::*;
        matches!(
            (self, to),
            (Funding, Funding | Open | Closing | Closed)
                | (Open, Open | Closing | Closed)
                | (Closing, Closed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == ChannelState::Closed
    }
}

/// Which slot of a canonical channel key a principal occupies.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Side {
    One,
    Two,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::One => Side::Two,
            Side::Two => Side::One,
        }
    }
}

/// The unordered (principal pair, asset) identity of a channel, stored in
/// canonical order with `principal_1 < principal_2`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct ChannelKey {
    pub asset: Option<AssetId>,
    pub principal_1: Principal,
    pub principal_2: Principal,
}

impl ChannelKey {
    pub fn new(asset: Option<AssetId>, a: Principal, b: Principal) -> Result<Self> {
        if a == b {
            return Err(Error::InvalidParameter(format!(
                "a channel needs two distinct principals, got {} twice",
                a
            )));
        }
        let (principal_1, principal_2) = if a < b { (a, b) } else { (b, a) };
        Ok(Self {
            asset,
            principal_1,
            principal_2,
        })
    }

    /// Deterministic identifier, so one key can never map to two rows.
    pub fn id(&self) -> Hash256 {
        let mut buf = Vec::with_capacity(128);
        self.encode_into(&mut buf);
        sha256(buf).into()
    }

    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        match &self.asset {
            Some(asset) => {
                buf.push(1);
                encode_str(buf, asset.as_str());
            }
            None => buf.push(0),
        }
        encode_str(buf, self.principal_1.as_str());
        encode_str(buf, self.principal_2.as_str());
    }

    pub fn side_of(&self, principal: &Principal) -> Option<Side> {
        if &self.principal_1 == principal {
            Some(Side::One)
        } else if &self.principal_2 == principal {
            Some(Side::Two)
        } else {
            None
        }
    }

    pub fn contains(&self, principal: &Principal) -> bool {
        self.side_of(principal).is_some()
    }

    pub fn principal(&self, side: Side) -> &Principal {
        match side {
            Side::One => &self.principal_1,
            Side::Two => &self.principal_2,
        }
    }

    /// The other party of a channel the given principal belongs to.
    pub fn counterparty_of(&self, principal: &Principal) -> Option<&Principal> {
        self.side_of(principal)
            .map(|side| self.principal(side.other()))
    }
}

fn encode_str(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
}

/// Balances in canonical key order.
#[serde_as]
#[derive(Debug, Copy, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct Balances {
    #[serde_as(as = "U128Hex")]
    pub balance_1: u128,
    #[serde_as(as = "U128Hex")]
    pub balance_2: u128,
}

impl Balances {
    pub fn new(balance_1: u128, balance_2: u128) -> Self {
        Self {
            balance_1,
            balance_2,
        }
    }

    /// Build balances from one side's perspective.
    pub fn from_sides(side: Side, mine: u128, theirs: u128) -> Self {
        match side {
            Side::One => Self::new(mine, theirs),
            Side::Two => Self::new(theirs, mine),
        }
    }

    pub fn get(&self, side: Side) -> u128 {
        match side {
            Side::One => self.balance_1,
            Side::Two => self.balance_2,
        }
    }

    pub fn total(&self) -> Option<u128> {
        self.balance_1.checked_add(self.balance_2)
    }
}

/// A unilateral closure observed on the settlement layer.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ClosingClaim {
    #[serde_as(as = "U128Hex")]
    pub nonce: u128,
    pub balances: Balances,
    pub initiator: Principal,
    /// Settlement-layer height at which the closure was observed.
    pub height: u64,
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Channel {
    pub id: Hash256,
    pub key: ChannelKey,
    pub balances: Balances,
    #[serde_as(as = "U128Hex")]
    pub nonce: u128,
    pub expires_at: Option<u64>,
    pub state: ChannelState,
    /// Present while `Closing`, kept afterwards for auditing.
    pub closing_claim: Option<ClosingClaim>,
}

impl Channel {
    pub fn new(key: ChannelKey, state: ChannelState) -> Self {
        Self {
            id: key.id(),
            key,
            balances: Balances::default(),
            nonce: 0,
            expires_at: None,
            state,
            closing_claim: None,
        }
    }

    pub fn with_state(
        key: ChannelKey,
        balances: Balances,
        nonce: u128,
        expires_at: Option<u64>,
        state: ChannelState,
    ) -> Self {
        Self {
            balances,
            nonce,
            expires_at,
            ..Self::new(key, state)
        }
    }

    /// Move to `to`, failing if the lifecycle does not allow it.
    pub fn transition(&mut self, to: ChannelState) -> Result<()> {
        if !self.state.allow_transition(&to) {
            return Err(Error::InvalidChannelState {
                channel_id: self.id,
                state: self.state,
            });
        }
        self.state = to;
        Ok(())
    }
}

/// The exact tuple the settlement contract hashes and both parties sign.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct StateMessage {
    pub key: ChannelKey,
    pub balances: Balances,
    pub nonce: u128,
    pub action: Action,
    pub actor: Option<Principal>,
    pub secret_hash: Option<Hash256>,
}

impl StateMessage {
    /// Deterministic byte encoding of the tuple.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(256);
        self.key.encode_into(&mut buf);
        buf.extend_from_slice(&self.balances.balance_1.to_be_bytes());
        buf.extend_from_slice(&self.balances.balance_2.to_be_bytes());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.push(self.action.code());
        match &self.actor {
            Some(actor) => {
                buf.push(1);
                encode_str(&mut buf, actor.as_str());
            }
            None => buf.push(0),
        }
        match &self.secret_hash {
            Some(hash) => {
                buf.push(1);
                buf.extend_from_slice(hash.as_ref());
            }
            None => buf.push(0),
        }
        buf
    }
}

/// The latest mutually-authenticated snapshot of a channel.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SignedState {
    pub channel_id: Hash256,
    pub balances: Balances,
    #[serde_as(as = "U128Hex")]
    pub nonce: u128,
    pub action: Action,
    pub actor: Option<Principal>,
    pub secret_hash: Option<Hash256>,
    pub hub_signature: Signature,
    pub counterparty_signature: Signature,
}

impl SignedState {
    /// Whether this state commits to exactly the given tuple.
    pub fn commits_to(&self, message: &StateMessage) -> bool {
        self.channel_id == message.key.id()
            && self.balances == message.balances
            && self.nonce == message.nonce
            && self.action == message.action
            && self.actor == message.actor
            && self.secret_hash == message.secret_hash
    }

    pub fn message(&self, key: &ChannelKey) -> StateMessage {
        StateMessage {
            key: key.clone(),
            balances: self.balances,
            nonce: self.nonce,
            action: self.action,
            actor: self.actor.clone(),
            secret_hash: self.secret_hash,
        }
    }
}
