//! Config and metadata key-value store operations for [`SqliteStore`].

use rusqlite::{Connection, params};

use crate::error::{Result, map_no_rows};
use crate::sqlite::store::SqliteStore;

pub(crate) fn set_config_on_conn(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO config (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn get_config_on_conn(conn: &Connection, key: &str) -> Result<String> {
    conn.query_row(
        "SELECT value FROM config WHERE key = ?1",
        params![key],
        |row| row.get::<_, String>(0),
    )
    .map_err(map_no_rows("config", key))
}

impl SqliteStore {
    /// Sets a configuration key-value pair.
    pub fn set_config_impl(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        set_config_on_conn(&conn, key, value)
    }

    /// Gets a configuration value by key.
    pub fn get_config_impl(&self, key: &str) -> Result<String> {
        let conn = self.lock_conn()?;
        get_config_on_conn(&conn, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_config() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set_config_impl("actor", "witness").unwrap();
        assert_eq!(store.get_config_impl("actor").unwrap(), "witness");
        store.set_config_impl("actor", "mayor").unwrap();
        assert_eq!(store.get_config_impl("actor").unwrap(), "mayor");
    }

    #[test]
    fn missing_config_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get_config_impl("nope").unwrap_err().is_not_found());
    }
}
