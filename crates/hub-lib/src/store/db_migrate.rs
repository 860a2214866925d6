use super::Store;
use crate::Result;
use std::cmp::Ordering;
use tracing::{debug, error, info};

pub const MIGRATION_VERSION_KEY: &[u8] = b"db-version";
/// Schema version written by this binary, `date +'%Y%m%d%H%M%S'` format.
pub const LATEST_DB_VERSION: &str = "20261001000000";

/// Schema version helper
pub struct DbMigrate<'a> {
    db: &'a Store,
}

impl<'a> DbMigrate<'a> {
    pub fn new(db: &'a Store) -> Self {
        DbMigrate { db }
    }

    fn db_version(&self) -> Result<Option<String>> {
        Ok(self
            .db
            .get(MIGRATION_VERSION_KEY)?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Check if database's version is matched with the executable binary version.
    ///
    /// Returns
    /// - Less: The database version is less than the matched version of the executable binary.
    /// - Equal: The database version is matched with the executable binary version.
    /// - Greater: The database version is greater than the matched version of the executable binary.
    ///   Requires upgrade the executable binary.
    pub fn check(&self) -> Result<Ordering> {
        match self.db_version()? {
            Some(version) => {
                debug!(
                    "Current database version: [{}], latest db version: [{}]",
                    version, LATEST_DB_VERSION
                );
                Ok(version.as_str().cmp(LATEST_DB_VERSION))
            }
            None => Ok(Ordering::Less),
        }
    }

    pub fn need_init(&self) -> Result<bool> {
        Ok(self.db_version()?.is_none())
    }

    pub fn init_db_version(&self) -> Result<()> {
        if self.need_init()? {
            info!("Init database version {}", LATEST_DB_VERSION);
            self.db.put(MIGRATION_VERSION_KEY, LATEST_DB_VERSION)?;
        }
        Ok(())
    }

    pub fn init_or_check(&self) -> std::result::Result<(), String> {
        if self.need_init().map_err(|e| e.to_string())? {
            info!("begin to init db version ...");
            return self.init_db_version().map_err(|e| e.to_string());
        }
        match self.check().map_err(|e| e.to_string())? {
            Ordering::Greater => {
                error!(
                    "The database was created by a higher version flowhub executable binary \n\
                     and cannot be opened by the current binary."
                );
                Err("incompatible database, need to upgrade flowhub binary".to_string())
            }
            Ordering::Equal => Ok(()),
            Ordering::Less => Err(format!(
                "database schema is older than {}, no migration is available for it",
                LATEST_DB_VERSION
            )),
        }
    }
}
