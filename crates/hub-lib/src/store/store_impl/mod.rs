mod native;
pub use native::{Batch, DbDirection, IteratorMode, Store};

use super::db_migrate::DbMigrate;
use super::schema::*;
use crate::channel::{Channel, ChannelStore, SignedState};
use crate::dispute::{DisputeRecord, DisputeStore};
use crate::primitives::{sha256, Hash256, Principal};
use crate::reconciler::EventCursorStore;
use crate::routing::{ConditionalStore, PendingConditionalUpdate};
use crate::{Error, Result};

use serde::Serialize;

pub(crate) fn serialize_to_vec<T: ?Sized + Serialize>(value: &T, field_name: &str) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| Error::DBInternalError(format!("serialization of {} failed: {}", field_name, e)))
}

pub(crate) fn deserialize_from<'a, T>(slice: &'a [u8], field_name: &str) -> Result<T>
where
    T: serde::Deserialize<'a>,
{
    bincode::deserialize(slice).map_err(|e| {
        Error::DBInternalError(format!("deserialization of {} failed: {}", field_name, e))
    })
}

fn check_migrate(db: &Store) -> std::result::Result<(), String> {
    DbMigrate::new(db).init_or_check()
}

fn channel_id_suffix(key: &[u8]) -> Result<Hash256> {
    let start = key
        .len()
        .checked_sub(32)
        .ok_or_else(|| Error::DBInternalError("index key shorter than a channel id".to_string()))?;
    Hash256::try_from(&key[start..]).map_err(|e| Error::DBInternalError(e.to_string()))
}

pub enum KeyValue {
    Channel(Hash256, Channel),
    // Index of principal -> channel, which allows listing the channels of a principal
    PrincipalChannel(Principal, Hash256),
    SignedState(Hash256, SignedState),
    PendingConditional(Hash256, PendingConditionalUpdate),
    // Index of secret hash -> channel, the secret hash in first position to allow fast retrieve
    SecretHashChannel(Hash256, Hash256),
    DisputeRecord((Hash256, u128), DisputeRecord),
    EventCursor(u64),
}

pub trait StoreKeyValue {
    fn key(&self) -> Vec<u8>;
    fn value(&self) -> Result<Vec<u8>>;
}

pub(crate) fn principal_channel_key(principal: &Principal, channel_id: &Hash256) -> Vec<u8> {
    [
        &[PRINCIPAL_CHANNEL_PREFIX],
        sha256(principal.as_str()).as_slice(),
        channel_id.as_ref(),
    ]
    .concat()
}

pub(crate) fn secret_hash_channel_key(secret_hash: &Hash256, channel_id: &Hash256) -> Vec<u8> {
    [
        &[SECRET_HASH_CHANNEL_PREFIX],
        secret_hash.as_ref(),
        channel_id.as_ref(),
    ]
    .concat()
}

pub(crate) fn dispute_record_key(channel_id: &Hash256, claimed_nonce: u128) -> Vec<u8> {
    [
        &[DISPUTE_RECORD_PREFIX],
        channel_id.as_ref(),
        claimed_nonce.to_be_bytes().as_slice(),
    ]
    .concat()
}

impl StoreKeyValue for KeyValue {
    fn key(&self) -> Vec<u8> {
        match self {
            KeyValue::Channel(id, _) => [&[CHANNEL_PREFIX], id.as_ref()].concat(),
            KeyValue::PrincipalChannel(principal, id) => principal_channel_key(principal, id),
            KeyValue::SignedState(id, _) => [&[SIGNED_STATE_PREFIX], id.as_ref()].concat(),
            KeyValue::PendingConditional(id, _) => {
                [&[PENDING_CONDITIONAL_PREFIX], id.as_ref()].concat()
            }
            KeyValue::SecretHashChannel(secret_hash, id) => secret_hash_channel_key(secret_hash, id),
            KeyValue::DisputeRecord((id, nonce), _) => dispute_record_key(id, *nonce),
            KeyValue::EventCursor(_) => vec![EVENT_CURSOR_PREFIX],
        }
    }

    fn value(&self) -> Result<Vec<u8>> {
        match self {
            KeyValue::Channel(_, channel) => serialize_to_vec(channel, "Channel"),
            KeyValue::PrincipalChannel(..) | KeyValue::SecretHashChannel(..) => Ok(Vec::new()),
            KeyValue::SignedState(_, state) => serialize_to_vec(state, "SignedState"),
            KeyValue::PendingConditional(_, pending) => {
                serialize_to_vec(pending, "PendingConditionalUpdate")
            }
            KeyValue::DisputeRecord(_, record) => serialize_to_vec(record, "DisputeRecord"),
            KeyValue::EventCursor(height) => Ok(height.to_be_bytes().into()),
        }
    }
}

impl ChannelStore for Store {
    fn get_channel(&self, id: &Hash256) -> Result<Option<Channel>> {
        let key = [&[CHANNEL_PREFIX], id.as_ref()].concat();
        self.get(key)?
            .map(|v| deserialize_from(v.as_ref(), "Channel"))
            .transpose()
    }

    fn get_signed_state(&self, id: &Hash256) -> Result<Option<SignedState>> {
        let key = [&[SIGNED_STATE_PREFIX], id.as_ref()].concat();
        self.get(key)?
            .map(|v| deserialize_from(v.as_ref(), "SignedState"))
            .transpose()
    }

    fn get_channel_ids_by_principal(&self, principal: &Principal) -> Result<Vec<Hash256>> {
        let prefix = [
            &[PRINCIPAL_CHANNEL_PREFIX],
            sha256(principal.as_str()).as_slice(),
        ]
        .concat();
        self.prefix_iterator(&prefix)
            .map(|(key, _)| channel_id_suffix(&key))
            .collect()
    }

    fn get_channels(&self) -> Result<Vec<Channel>> {
        let prefix = [CHANNEL_PREFIX];
        self.prefix_iterator(&prefix)
            .map(|(_, value)| deserialize_from(value.as_ref(), "Channel"))
            .collect()
    }
}

impl ConditionalStore for Store {
    fn get_pending_conditional(&self, channel_id: &Hash256) -> Result<Option<PendingConditionalUpdate>> {
        let key = [&[PENDING_CONDITIONAL_PREFIX], channel_id.as_ref()].concat();
        self.get(key)?
            .map(|v| deserialize_from(v.as_ref(), "PendingConditionalUpdate"))
            .transpose()
    }

    fn get_channel_ids_by_secret_hash(&self, secret_hash: &Hash256) -> Result<Vec<Hash256>> {
        let prefix = [&[SECRET_HASH_CHANNEL_PREFIX], secret_hash.as_ref()].concat();
        self.prefix_iterator(&prefix)
            .map(|(key, _)| channel_id_suffix(&key))
            .collect()
    }

    fn get_pending_conditionals(&self) -> Result<Vec<PendingConditionalUpdate>> {
        let prefix = [PENDING_CONDITIONAL_PREFIX];
        self.prefix_iterator(&prefix)
            .map(|(_, value)| deserialize_from(value.as_ref(), "PendingConditionalUpdate"))
            .collect()
    }
}

impl DisputeStore for Store {
    fn get_dispute_record(
        &self,
        channel_id: &Hash256,
        claimed_nonce: u128,
    ) -> Result<Option<DisputeRecord>> {
        self.get(dispute_record_key(channel_id, claimed_nonce))?
            .map(|v| deserialize_from(v.as_ref(), "DisputeRecord"))
            .transpose()
    }

    fn get_dispute_records(&self, channel_id: Option<&Hash256>) -> Result<Vec<DisputeRecord>> {
        let prefix = match channel_id {
            Some(id) => [&[DISPUTE_RECORD_PREFIX], id.as_ref()].concat(),
            None => vec![DISPUTE_RECORD_PREFIX],
        };
        self.prefix_iterator(&prefix)
            .map(|(_, value)| deserialize_from(value.as_ref(), "DisputeRecord"))
            .collect()
    }
}

impl EventCursorStore for Store {
    fn get_event_cursor(&self) -> Result<Option<u64>> {
        match self.get([EVENT_CURSOR_PREFIX])? {
            Some(value) => {
                let bytes: [u8; 8] = value.as_slice().try_into().map_err(|_| {
                    Error::DBInternalError("event cursor should be 8 bytes".to_string())
                })?;
                Ok(Some(u64::from_be_bytes(bytes)))
            }
            None => Ok(None),
        }
    }
}
