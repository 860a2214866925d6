use serde::Deserialize;
use serde_json::Value;
use serde_with::serde_as;
use tracing::{debug, warn};

use crate::channel::{Balances, ChannelKey};
use crate::primitives::{AssetId, Hash256, Principal, Signature};
use crate::serde_utils::Decimal;
use crate::{Error, Result};

const CONTRACT_EVENT_TYPE: &str = "SmartContractEvent";

/// Names of the contract events the hub acts upon.
pub const KNOWN_EVENTS: &[&str] = &[
    "fund-channel",
    "close-channel",
    "finalize",
    "dispute-closure",
    "force-close",
    "force-cancel",
    "deposit",
    "withdraw",
    "reveal-secret",
];

#[serde_as]
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
pub struct OnChainChannel {
    #[serde(rename = "balance-1")]
    #[serde_as(as = "Decimal")]
    pub balance_1: u128,
    #[serde(rename = "balance-2")]
    #[serde_as(as = "Decimal")]
    pub balance_2: u128,
    /// The contract uses `u128::MAX` for "no expiry".
    #[serde(rename = "expires-at", default)]
    #[serde_as(as = "Option<Decimal>")]
    pub expires_at: Option<u128>,
    #[serde_as(as = "Decimal")]
    pub nonce: u128,
}

#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
pub struct OnChainChannelKey {
    #[serde(rename = "principal-1")]
    pub principal_1: Principal,
    #[serde(rename = "principal-2")]
    pub principal_2: Principal,
    #[serde(default)]
    pub token: Option<AssetId>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
pub struct ChannelEvent {
    pub channel: OnChainChannel,
    #[serde(rename = "channel-key")]
    pub channel_key: OnChainChannelKey,
    pub sender: Principal,
    #[serde(default)]
    #[serde_as(as = "Option<Decimal>")]
    pub amount: Option<u128>,
    /// Signature of `sender`.
    #[serde(rename = "my-signature", default)]
    pub my_signature: Option<String>,
    #[serde(rename = "their-signature", default)]
    pub their_signature: Option<String>,
}

impl ChannelEvent {
    pub fn key(&self) -> Result<ChannelKey> {
        ChannelKey::new(
            self.channel_key.token.clone(),
            self.channel_key.principal_1.clone(),
            self.channel_key.principal_2.clone(),
        )
    }

    pub fn balances(&self) -> Balances {
        Balances::new(self.channel.balance_1, self.channel.balance_2)
    }

    pub fn nonce(&self) -> u128 {
        self.channel.nonce
    }

    pub fn expires_at(&self) -> Option<u64> {
        self.channel
            .expires_at
            .and_then(|height| u64::try_from(height).ok())
    }

    /// Both signatures as (sender's, other party's), if the event carries them.
    pub fn signatures(&self) -> Result<Option<(Signature, Signature)>> {
        let parse = |s: &str| {
            s.parse::<Signature>()
                .map_err(|e| Error::InvalidPayload(format!("bad signature in event: {}", e)))
        };
        match (&self.my_signature, &self.their_signature) {
            (Some(mine), Some(theirs)) => Ok(Some((parse(mine)?, parse(theirs)?))),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
pub struct RevealSecretEvent {
    pub secret: Hash256,
}

/// Contract events, tagged by their `event` field.
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SettlementEvent {
    FundChannel(ChannelEvent),
    CloseChannel(ChannelEvent),
    Finalize(ChannelEvent),
    DisputeClosure(ChannelEvent),
    ForceClose(ChannelEvent),
    ForceCancel(ChannelEvent),
    Deposit(ChannelEvent),
    Withdraw(ChannelEvent),
    RevealSecret(RevealSecretEvent),
}

impl SettlementEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SettlementEvent::FundChannel(_) => "fund-channel",
            SettlementEvent::CloseChannel(_) => "close-channel",
            SettlementEvent::Finalize(_) => "finalize",
            SettlementEvent::DisputeClosure(_) => "dispute-closure",
            SettlementEvent::ForceClose(_) => "force-close",
            SettlementEvent::ForceCancel(_) => "force-cancel",
            SettlementEvent::Deposit(_) => "deposit",
            SettlementEvent::Withdraw(_) => "withdraw",
            SettlementEvent::RevealSecret(_) => "reveal-secret",
        }
    }

    pub fn channel_event(&self) -> Option<&ChannelEvent> {
        match self {
            SettlementEvent::RevealSecret(_) => None,
            SettlementEvent::FundChannel(e)
            | SettlementEvent::CloseChannel(e)
            | SettlementEvent::Finalize(e)
            | SettlementEvent::DisputeClosure(e)
            | SettlementEvent::ForceClose(e)
            | SettlementEvent::ForceCancel(e)
            | SettlementEvent::Deposit(e)
            | SettlementEvent::Withdraw(e) => Some(e),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ParsedEvent {
    Known(SettlementEvent),
    /// A known event that failed to parse.
    Malformed { name: String, reason: String },
    /// Not a contract event, or not one the hub acts upon.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct Block {
    pub height: u64,
    pub events: Vec<ParsedEvent>,
}

#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    pub blocks: Vec<Block>,
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidPayload(reason.into())
}

/// Parse a delivery body. Structural problems reject the whole batch; a bad
/// individual event is kept as [`ParsedEvent::Malformed`].
pub fn parse_batch(body: &[u8]) -> Result<EventBatch> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| invalid(format!("body is not JSON: {}", e)))?;
    let apply = value
        .get("apply")
        .and_then(Value::as_array)
        .ok_or_else(|| invalid("missing `apply` array"))?;

    let mut blocks = Vec::with_capacity(apply.len());
    let mut last_height: Option<u64> = None;
    for block in apply {
        let height = block
            .pointer("/block_identifier/index")
            .and_then(Value::as_u64)
            .ok_or_else(|| invalid("block without `block_identifier.index`"))?;
        if last_height.is_some_and(|last| height <= last) {
            return Err(invalid(format!(
                "block heights must strictly increase, got {} after {:?}",
                height, last_height
            )));
        }
        last_height = Some(height);

        let transactions = block
            .get("transactions")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid(format!("block {} without `transactions` array", height)))?;
        let mut events = Vec::new();
        for tx in transactions {
            let Some(tx_events) = tx
                .pointer("/metadata/receipt/events")
                .and_then(Value::as_array)
            else {
                continue;
            };
            events.extend(tx_events.iter().map(parse_event));
        }
        blocks.push(Block { height, events });
    }
    Ok(EventBatch { blocks })
}

fn parse_event(event: &Value) -> ParsedEvent {
    if event.get("type").and_then(Value::as_str) != Some(CONTRACT_EVENT_TYPE) {
        return ParsedEvent::Ignored;
    }
    let Some(value) = event.pointer("/data/value") else {
        return ParsedEvent::Ignored;
    };
    let Some(name) = value.get("event").and_then(Value::as_str) else {
        return ParsedEvent::Ignored;
    };
    if !KNOWN_EVENTS.contains(&name) {
        debug!("Ignoring contract event {}", name);
        return ParsedEvent::Ignored;
    }
    match SettlementEvent::deserialize(value) {
        Ok(event) => ParsedEvent::Known(event),
        Err(e) => {
            warn!("Malformed {} event: {}", name, e);
            ParsedEvent::Malformed {
                name: name.to_string(),
                reason: e.to_string(),
            }
        }
    }
}
