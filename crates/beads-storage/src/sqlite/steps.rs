//! Step CRUD operations for [`SqliteStore`].

use rusqlite::{Connection, ErrorCode, Row, params};

use beads_core::enums::EventType;
use beads_core::filter::StepFilter;
use beads_core::step::Step;

use crate::error::{Result, StorageError, map_no_rows};
use crate::sqlite::events::{EventRecord, emit_event};
use crate::sqlite::store::{Audit, SqliteStore, format_datetime, parse_column, parse_datetime};
use crate::traits::StepUpdates;

const STEP_COLUMNS: &str =
    "id, instance_id, ordinal, title, description, status, waits_for, sealed, created_at, updated_at";

fn scan_step(row: &Row<'_>) -> rusqlite::Result<Step> {
    Ok(Step {
        id: row.get("id")?,
        instance_id: row.get("instance_id")?,
        ordinal: row.get("ordinal")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: parse_column(5, "status", row.get("status")?)?,
        waits_for: row.get("waits_for")?,
        sealed: row.get::<_, i32>("sealed")? != 0,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
    })
}

// ---------------------------------------------------------------------------
// Connection-level helpers (used by both SqliteStore and Transaction)
// ---------------------------------------------------------------------------

pub(crate) fn insert_step(conn: &Connection, step: &Step) -> Result<()> {
    let inserted = conn.execute(
        &format!("INSERT INTO steps ({STEP_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        params![
            step.id,
            step.instance_id,
            step.ordinal,
            step.title,
            step.description,
            step.status.as_str(),
            step.waits_for,
            step.sealed as i32,
            format_datetime(&step.created_at),
            format_datetime(&step.updated_at),
        ],
    );
    match inserted {
        Ok(_) => Ok(()),
        Err(rusqlite::Error::SqliteFailure(e, msg))
            if e.code == ErrorCode::ConstraintViolation
                && msg.as_deref().is_some_and(|m| m.contains("UNIQUE")) =>
        {
            Err(StorageError::already_exists("step", &step.id))
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn get_step_on_conn(conn: &Connection, id: &str) -> Result<Step> {
    conn.query_row(
        &format!("SELECT {STEP_COLUMNS} FROM steps WHERE id = ?1"),
        params![id],
        scan_step,
    )
    .map_err(map_no_rows("step", id))
}

pub(crate) fn list_steps_on_conn(
    conn: &Connection,
    instance_id: &str,
    filter: &StepFilter,
) -> Result<Vec<Step>> {
    let mut sql = format!("SELECT {STEP_COLUMNS} FROM steps WHERE instance_id = ?1");
    if filter.fan_in_only {
        sql.push_str(" AND waits_for IS NOT NULL");
    }
    if filter.status.is_some() {
        sql.push_str(" AND status = ?2");
    }
    sql.push_str(" ORDER BY ordinal");

    let mut stmt = conn.prepare(&sql)?;
    let rows = match filter.status {
        Some(status) => stmt.query_map(params![instance_id, status.as_str()], scan_step)?,
        None => stmt.query_map(params![instance_id], scan_step)?,
    };
    let mut steps = Vec::new();
    for row in rows {
        steps.push(row?);
    }
    Ok(steps)
}

/// Applies partial updates, honouring the `expected_status` guard.
pub(crate) fn update_step_on_conn(
    conn: &Connection,
    id: &str,
    updates: &StepUpdates,
    audit: Audit<'_>,
) -> Result<()> {
    let before = get_step_on_conn(conn, id)?;
    if let Some(expected) = updates.expected_status {
        if before.status != expected {
            return Err(StorageError::conflict(
                "step",
                id,
                format!("expected status {expected}, found {}", before.status),
            ));
        }
    }

    let mut set_clauses: Vec<&str> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(status) = updates.status {
        set_clauses.push("status = ?");
        param_values.push(Box::new(status.as_str().to_string()));
    }
    if let Some(sealed) = updates.sealed {
        set_clauses.push("sealed = ?");
        param_values.push(Box::new(sealed as i32));
    }
    if set_clauses.is_empty() {
        return Ok(());
    }

    // Always update updated_at.
    set_clauses.push("updated_at = ?");
    param_values.push(Box::new(format_datetime(&chrono::Utc::now())));

    let mut sql = format!("UPDATE steps SET {} WHERE id = ?", set_clauses.join(", "));
    param_values.push(Box::new(id.to_string()));
    if let Some(expected) = updates.expected_status {
        sql.push_str(" AND status = ?");
        param_values.push(Box::new(expected.as_str().to_string()));
    }

    let param_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let affected = conn.execute(&sql, param_refs.as_slice())?;
    if affected == 0 {
        return Err(StorageError::conflict("step", id, "status changed before update"));
    }

    if let Some(status) = updates.status {
        if status != before.status {
            emit_event(
                conn,
                audit,
                EventRecord::new(id, EventType::StatusChanged)
                    .change(before.status.as_str(), status.as_str()),
            )?;
        }
    }
    if updates.sealed == Some(true) && !before.sealed {
        emit_event(conn, audit, EventRecord::new(id, EventType::Sealed))?;
    }
    Ok(())
}

pub(crate) fn delete_steps_on_conn(conn: &Connection, instance_id: &str) -> Result<usize> {
    let affected = conn.execute("DELETE FROM steps WHERE instance_id = ?1", params![instance_id])?;
    Ok(affected)
}

// ---------------------------------------------------------------------------
// SqliteStore step methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    pub fn put_step_impl(&self, step: &Step) -> Result<()> {
        let conn = self.lock_conn()?;
        insert_step(&conn, step)
    }

    pub fn get_step_impl(&self, id: &str) -> Result<Step> {
        let conn = self.lock_conn()?;
        get_step_on_conn(&conn, id)
    }

    pub fn list_steps_impl(&self, instance_id: &str, filter: &StepFilter) -> Result<Vec<Step>> {
        let conn = self.lock_conn()?;
        list_steps_on_conn(&conn, instance_id, filter)
    }

    pub fn update_step_impl(&self, id: &str, updates: &StepUpdates, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        update_step_on_conn(&conn, id, updates, self.audit(actor))
    }

    pub fn delete_steps_impl(&self, instance_id: &str) -> Result<usize> {
        let conn = self.lock_conn()?;
        delete_steps_on_conn(&conn, instance_id)
    }
}
