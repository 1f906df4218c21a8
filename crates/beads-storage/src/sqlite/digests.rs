//! Digest and tombstone records for [`SqliteStore`].

use rusqlite::{Connection, OptionalExtension, Row, params};

use beads_core::digest::{Digest, Tombstone};
use beads_core::enums::EventType;

use crate::error::{Result, map_no_rows};
use crate::sqlite::events::{EventRecord, emit_event};
use crate::sqlite::store::{Audit, SqliteStore, format_datetime, parse_column, parse_datetime};

const DIGEST_COLUMNS: &str = "id, instance_id, template_id, summary, durability, \
     steps_total, steps_done, created_at, created_by";

fn scan_digest(row: &Row<'_>) -> rusqlite::Result<Digest> {
    Ok(Digest {
        id: row.get("id")?,
        instance_id: row.get("instance_id")?,
        template_id: row.get("template_id")?,
        summary: row.get("summary")?,
        durability: parse_column(4, "durability", row.get("durability")?)?,
        steps_total: row.get("steps_total")?,
        steps_done: row.get("steps_done")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        created_by: row.get("created_by")?,
    })
}

// ---------------------------------------------------------------------------
// Digests
// ---------------------------------------------------------------------------

pub(crate) fn insert_digest(conn: &Connection, digest: &Digest) -> Result<i64> {
    conn.execute(
        "INSERT INTO digests
         (instance_id, template_id, summary, durability, steps_total, steps_done, created_at, created_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            digest.instance_id,
            digest.template_id,
            digest.summary,
            digest.durability.as_str(),
            digest.steps_total,
            digest.steps_done,
            format_datetime(&digest.created_at),
            digest.created_by,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn get_digest_on_conn(conn: &Connection, id: i64) -> Result<Digest> {
    conn.query_row(
        &format!("SELECT {DIGEST_COLUMNS} FROM digests WHERE id = ?1"),
        params![id],
        scan_digest,
    )
    .map_err(map_no_rows("digest", &id.to_string()))
}

pub(crate) fn list_digests_on_conn(
    conn: &Connection,
    instance_id: Option<&str>,
) -> Result<Vec<Digest>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {DIGEST_COLUMNS} FROM digests
         WHERE ?1 IS NULL OR instance_id = ?1
         ORDER BY id DESC"
    ))?;
    let rows = stmt.query_map(params![instance_id], scan_digest)?;
    let mut digests = Vec::new();
    for row in rows {
        digests.push(row?);
    }
    Ok(digests)
}

// ---------------------------------------------------------------------------
// Tombstones
// ---------------------------------------------------------------------------

pub(crate) fn insert_tombstone(
    conn: &Connection,
    tombstone: &Tombstone,
    audit: Audit<'_>,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO tombstones (id, durability, burned_at) VALUES (?1, ?2, ?3)",
        params![
            tombstone.id,
            tombstone.durability.as_str(),
            format_datetime(&tombstone.burned_at),
        ],
    )?;
    emit_event(conn, audit, EventRecord::new(&tombstone.id, EventType::Burned))
}

pub(crate) fn get_tombstone_on_conn(conn: &Connection, id: &str) -> Result<Option<Tombstone>> {
    let tombstone = conn
        .query_row(
            "SELECT id, durability, burned_at FROM tombstones WHERE id = ?1",
            params![id],
            |row| {
                Ok(Tombstone {
                    id: row.get("id")?,
                    durability: parse_column(1, "durability", row.get("durability")?)?,
                    burned_at: parse_datetime(&row.get::<_, String>("burned_at")?),
                })
            },
        )
        .optional()?;
    Ok(tombstone)
}

pub(crate) fn delete_tombstone_on_conn(conn: &Connection, id: &str) -> Result<()> {
    conn.execute("DELETE FROM tombstones WHERE id = ?1", params![id])?;
    Ok(())
}

impl SqliteStore {
    pub fn put_digest_impl(&self, digest: &Digest) -> Result<i64> {
        let conn = self.lock_conn()?;
        insert_digest(&conn, digest)
    }

    pub fn get_digest_impl(&self, id: i64) -> Result<Digest> {
        let conn = self.lock_conn()?;
        get_digest_on_conn(&conn, id)
    }

    pub fn list_digests_impl(&self, instance_id: Option<&str>) -> Result<Vec<Digest>> {
        let conn = self.lock_conn()?;
        list_digests_on_conn(&conn, instance_id)
    }

    pub fn delete_digest_impl(&self, id: i64) -> Result<()> {
        let conn = self.lock_conn()?;
        let affected = conn.execute("DELETE FROM digests WHERE id = ?1", params![id])?;
        if affected == 0 {
            return Err(crate::StorageError::not_found("digest", id.to_string()));
        }
        Ok(())
    }

    pub fn get_tombstone_impl(&self, id: &str) -> Result<Option<Tombstone>> {
        let conn = self.lock_conn()?;
        get_tombstone_on_conn(&conn, id)
    }
}
