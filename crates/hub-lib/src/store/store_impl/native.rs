use super::check_migrate;
use super::{KeyValue, StoreKeyValue};
use crate::store::transaction::ChannelLocks;
use crate::Result;

pub use rocksdb::Direction as DbDirection;
pub use rocksdb::IteratorMode;
use rocksdb::{prelude::*, DBCompressionType, WriteBatch, DB};
use std::{path::Path, sync::Arc};

#[derive(Clone)]
pub struct Store {
    pub(crate) db: Arc<DB>,
    pub(crate) locks: ChannelLocks,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open a store, with db version check
    pub fn new<P: AsRef<Path>>(path: P) -> std::result::Result<Self, String> {
        let store = Self::open_db(path.as_ref())?;
        check_migrate(&store)?;
        Ok(store)
    }

    /// Open a store, without db version check
    pub fn open_db(path: &Path) -> std::result::Result<Self, String> {
        let mut options = Options::default();
        options.create_if_missing(true);
        options.set_compression_type(DBCompressionType::Lz4);
        let db = Arc::new(DB::open(&options, path).map_err(|e| e.to_string())?);
        Ok(Self {
            db,
            locks: ChannelLocks::default(),
        })
    }

    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key.as_ref())?.map(|v| v.to_vec()))
    }

    pub fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&self, key: K, value: V) -> Result<()> {
        self.db.put(key, value)?;
        Ok(())
    }

    pub fn batch(&self) -> Batch {
        Batch {
            db: Arc::clone(&self.db),
            wb: WriteBatch::default(),
        }
    }

    /// Returns a prefix iterator, using iterator mode `mode`, iterating over items prefixed with `prefix`
    pub fn prefix_iterator_with_start<'a>(
        &'a self,
        prefix: &'a [u8],
        mode: IteratorMode<'a>,
    ) -> impl Iterator<Item = (Box<[u8]>, Box<[u8]>)> + 'a {
        self.db
            .get_iter(
                &{
                    let mut opts = ReadOptions::default();
                    opts.set_prefix_same_as_start(true);
                    opts
                },
                mode,
            )
            .take_while(move |(col_key, _)| col_key.starts_with(prefix))
    }

    pub fn prefix_iterator<'a>(
        &'a self,
        prefix: &'a [u8],
    ) -> impl Iterator<Item = (Box<[u8]>, Box<[u8]>)> + 'a {
        self.prefix_iterator_with_start(prefix, IteratorMode::From(prefix, DbDirection::Forward))
    }
}

/// Writes buffered until `commit`, applied atomically. Dropping a batch discards it.
pub struct Batch {
    db: Arc<DB>,
    wb: WriteBatch,
}

impl Batch {
    pub fn put_kv(&mut self, key_value: KeyValue) -> Result<()> {
        let value = key_value.value()?;
        self.put(key_value.key(), value)
    }

    pub fn put<K: AsRef<[u8]>, V: AsRef<[u8]>>(&mut self, key: K, value: V) -> Result<()> {
        self.wb.put(key, value)?;
        Ok(())
    }

    pub fn delete<K: AsRef<[u8]>>(&mut self, key: K) -> Result<()> {
        self.wb.delete(key.as_ref())?;
        Ok(())
    }

    pub fn commit(self) -> Result<()> {
        self.db.write(&self.wb)?;
        Ok(())
    }
}
