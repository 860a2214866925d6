use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::schema::PENDING_CONDITIONAL_PREFIX;
use super::store_impl::{secret_hash_channel_key, Batch, KeyValue, Store};
use crate::channel::{Channel, SignedState};
use crate::dispute::DisputeRecord;
use crate::primitives::Hash256;
use crate::routing::PendingConditionalUpdate;
use crate::{Error, Result};

/// Per-channel async locks, shared by every clone of a [`Store`].
#[derive(Clone, Default)]
pub struct ChannelLocks {
    inner: Arc<Mutex<HashMap<Hash256, Arc<AsyncMutex<()>>>>>,
}

impl ChannelLocks {
    fn lock_for(&self, id: &Hash256) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        // Drop locks nobody is holding or waiting on.
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        map.entry(*id).or_default().clone()
    }

    /// Acquire the locks of `ids` in ascending id order, so two callers locking
    /// overlapping sets can not deadlock.
    async fn acquire(&self, ids: &[Hash256]) -> (Vec<Hash256>, Vec<OwnedMutexGuard<()>>) {
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            guards.push(self.lock_for(id).lock_owned().await);
        }
        (ids, guards)
    }
}

/// Exclusive access to a set of channels until dropped.
pub struct ChannelGuard {
    store: Store,
    ids: Vec<Hash256>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl Store {
    /// Serialize every lookup-then-act sequence on `channel_ids`.
    pub async fn lock_channels(&self, channel_ids: &[Hash256]) -> ChannelGuard {
        let (ids, guards) = self.locks.acquire(channel_ids).await;
        ChannelGuard {
            store: self.clone(),
            ids,
            _guards: guards,
        }
    }
}

impl ChannelGuard {
    pub fn is_locked(&self, id: &Hash256) -> bool {
        self.ids.binary_search(id).is_ok()
    }

    pub fn channel_ids(&self) -> &[Hash256] {
        &self.ids
    }

    /// Start a write transaction. Reads observe committed state only.
    pub fn begin(&self) -> StoreTransaction<'_> {
        StoreTransaction {
            guard: self,
            batch: self.store.batch(),
        }
    }
}

impl Deref for ChannelGuard {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Buffered writes over locked channels, applied in one atomic batch by
/// `commit`. Dropping an uncommitted transaction discards its writes.
pub struct StoreTransaction<'a> {
    guard: &'a ChannelGuard,
    batch: Batch,
}

impl<'a> StoreTransaction<'a> {
    fn ensure_locked(&self, id: &Hash256) -> Result<()> {
        if self.guard.is_locked(id) {
            Ok(())
        } else {
            Err(Error::DBInternalError(format!(
                "write to channel {} without holding its lock",
                id
            )))
        }
    }

    /// Write the channel row and its principal index entries.
    pub fn put_channel(&mut self, channel: &Channel) -> Result<()> {
        self.ensure_locked(&channel.id)?;
        for principal in [&channel.key.principal_1, &channel.key.principal_2] {
            self.batch
                .put_kv(KeyValue::PrincipalChannel(principal.clone(), channel.id))?;
        }
        self.batch
            .put_kv(KeyValue::Channel(channel.id, channel.clone()))
    }

    pub fn put_signed_state(&mut self, state: &SignedState) -> Result<()> {
        self.ensure_locked(&state.channel_id)?;
        self.batch
            .put_kv(KeyValue::SignedState(state.channel_id, state.clone()))
    }

    pub fn put_pending_conditional(&mut self, pending: &PendingConditionalUpdate) -> Result<()> {
        self.ensure_locked(&pending.channel_id)?;
        self.batch.put_kv(KeyValue::SecretHashChannel(
            pending.secret_hash,
            pending.channel_id,
        ))?;
        self.batch.put_kv(KeyValue::PendingConditional(
            pending.channel_id,
            pending.clone(),
        ))
    }

    pub fn delete_pending_conditional(&mut self, pending: &PendingConditionalUpdate) -> Result<()> {
        self.ensure_locked(&pending.channel_id)?;
        self.batch
            .delete(secret_hash_channel_key(&pending.secret_hash, &pending.channel_id))?;
        self.batch.delete(
            [&[PENDING_CONDITIONAL_PREFIX], pending.channel_id.as_ref()].concat(),
        )
    }

    pub fn put_dispute_record(&mut self, record: &DisputeRecord) -> Result<()> {
        self.ensure_locked(&record.channel_id)?;
        self.batch.put_kv(KeyValue::DisputeRecord(
            (record.channel_id, record.claimed_nonce),
            record.clone(),
        ))
    }

    /// The cursor is owned by the event reconciler, which serializes batches
    /// itself, so it needs no channel lock.
    pub fn set_event_cursor(&mut self, height: u64) -> Result<()> {
        self.batch.put_kv(KeyValue::EventCursor(height))
    }

    pub fn commit(self) -> Result<()> {
        self.batch.commit()
    }
}

impl Deref for StoreTransaction<'_> {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.guard.store
    }
}
