pub mod db_migrate;
mod schema;
pub mod store_impl;
mod transaction;

pub use store_impl::{Batch, KeyValue, Store, StoreKeyValue};
pub use transaction::{ChannelGuard, ChannelLocks, StoreTransaction};
