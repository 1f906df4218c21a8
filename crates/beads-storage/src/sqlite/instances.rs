//! Instance CRUD operations for [`SqliteStore`].

use std::collections::BTreeMap;

use rusqlite::{Connection, ErrorCode, Row, params};

use beads_core::enums::{EventType, InstanceStatus};
use beads_core::filter::InstanceFilter;
use beads_core::instance::Instance;

use crate::error::{Result, StorageError, map_no_rows};
use crate::sqlite::events::{EventRecord, emit_event};
use crate::sqlite::store::{Audit, SqliteStore, format_datetime, parse_column, parse_datetime};
use crate::traits::InstanceUpdates;

const INSTANCE_COLUMNS: &str = "id, template_id, title, description, durability, status, \
     bindings, parent, sealed, created_at, created_by, finalized_at";

/// Deserialises a row into an [`Instance`] (labels are filled in separately).
fn scan_instance(row: &Row<'_>) -> rusqlite::Result<Instance> {
    let bindings: String = row.get("bindings")?;
    let bindings: BTreeMap<String, String> = serde_json::from_str(&bindings).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Instance {
        id: row.get("id")?,
        template_id: row.get("template_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        labels: Vec::new(),
        durability: parse_column(4, "durability", row.get("durability")?)?,
        status: parse_column(5, "status", row.get("status")?)?,
        bindings,
        parent: row.get("parent")?,
        sealed: row.get::<_, i32>("sealed")? != 0,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        created_by: row.get("created_by")?,
        finalized_at: row
            .get::<_, Option<String>>("finalized_at")?
            .as_deref()
            .map(parse_datetime),
    })
}

fn load_labels(conn: &Connection, instance: &mut Instance) -> Result<()> {
    let mut stmt =
        conn.prepare("SELECT label FROM instance_labels WHERE instance_id = ?1 ORDER BY label")?;
    let rows = stmt.query_map(params![instance.id], |row| row.get::<_, String>(0))?;
    for row in rows {
        instance.labels.push(row?);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Connection-level helpers (used by both SqliteStore and Transaction)
// ---------------------------------------------------------------------------

pub(crate) fn insert_instance(conn: &Connection, instance: &Instance, audit: Audit<'_>) -> Result<()> {
    let bindings = serde_json::to_string(&instance.bindings)?;
    let inserted = conn.execute(
        &format!(
            "INSERT INTO instances ({INSTANCE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ),
        params![
            instance.id,
            instance.template_id,
            instance.title,
            instance.description,
            instance.durability.as_str(),
            instance.status.as_str(),
            bindings,
            instance.parent,
            instance.sealed as i32,
            format_datetime(&instance.created_at),
            instance.created_by,
            instance.finalized_at.as_ref().map(format_datetime),
        ],
    );
    match inserted {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
            return Err(StorageError::already_exists("instance", &instance.id));
        }
        Err(e) => return Err(e.into()),
    }

    for label in &instance.labels {
        conn.execute(
            "INSERT OR IGNORE INTO instance_labels (instance_id, label) VALUES (?1, ?2)",
            params![instance.id, label],
        )?;
    }

    emit_event(
        conn,
        audit,
        EventRecord::new(&instance.id, EventType::Bonded).comment(Some(&instance.template_id)),
    )
}

pub(crate) fn get_instance_on_conn(conn: &Connection, id: &str) -> Result<Instance> {
    let mut instance = conn
        .query_row(
            &format!("SELECT {INSTANCE_COLUMNS} FROM instances WHERE id = ?1"),
            params![id],
            scan_instance,
        )
        .map_err(map_no_rows("instance", id))?;
    load_labels(conn, &mut instance)?;
    Ok(instance)
}

pub(crate) fn list_instances_on_conn(
    conn: &Connection,
    filter: &InstanceFilter,
) -> Result<Vec<Instance>> {
    let mut where_clauses: Vec<String> = Vec::new();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

    if let Some(ref template_id) = filter.template_id {
        where_clauses.push("template_id = ?".to_string());
        param_values.push(Box::new(template_id.clone()));
    }
    if let Some(status) = filter.status {
        where_clauses.push("status = ?".to_string());
        param_values.push(Box::new(status.as_str().to_string()));
    }
    if let Some(ref parent) = filter.parent {
        where_clauses.push("parent = ?".to_string());
        param_values.push(Box::new(parent.clone()));
    }
    if filter.active_only {
        where_clauses.push("status = ?".to_string());
        param_values.push(Box::new(InstanceStatus::Active.as_str().to_string()));
    }
    for label in &filter.labels {
        where_clauses.push(
            "id IN (SELECT instance_id FROM instance_labels WHERE label = ?)".to_string(),
        );
        param_values.push(Box::new(label.clone()));
    }

    let mut sql = format!("SELECT {INSTANCE_COLUMNS} FROM instances");
    if !where_clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY created_at, id");
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let param_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(param_refs.as_slice(), scan_instance)?;
    let mut instances = Vec::new();
    for row in rows {
        instances.push(row?);
    }
    for instance in &mut instances {
        load_labels(conn, instance)?;
    }
    Ok(instances)
}

pub(crate) fn update_instance_on_conn(
    conn: &Connection,
    id: &str,
    updates: &InstanceUpdates,
    audit: Audit<'_>,
) -> Result<()> {
    let before = get_instance_on_conn(conn, id)?;

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
    if let Some(ref finalized_at) = updates.finalized_at {
        set_clauses.push("finalized_at = ?");
        param_values.push(Box::new(finalized_at.as_ref().map(format_datetime)));
    }
    if set_clauses.is_empty() {
        return Ok(());
    }

    let sql = format!("UPDATE instances SET {} WHERE id = ?", set_clauses.join(", "));
    param_values.push(Box::new(id.to_string()));
    let param_refs: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    conn.execute(&sql, param_refs.as_slice())?;

    if let Some(status) = updates.status {
        if status != before.status {
            let event_type = match status {
                InstanceStatus::Squashed => EventType::Squashed,
                InstanceStatus::Burned => EventType::Burned,
                InstanceStatus::Active => EventType::StatusChanged,
            };
            emit_event(
                conn,
                audit,
                EventRecord::new(id, event_type).change(before.status.as_str(), status.as_str()),
            )?;
        }
    }
    if updates.sealed == Some(true) && !before.sealed {
        emit_event(conn, audit, EventRecord::new(id, EventType::Sealed))?;
    }
    Ok(())
}

/// Deletes an instance; steps, edges and labels go with it (cascading FKs).
pub(crate) fn delete_instance_on_conn(conn: &Connection, id: &str) -> Result<usize> {
    let steps: usize = conn.query_row(
        "SELECT COUNT(*) FROM steps WHERE instance_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    let affected = conn.execute("DELETE FROM instances WHERE id = ?1", params![id])?;
    if affected == 0 {
        return Err(StorageError::not_found("instance", id));
    }
    Ok(steps)
}

// ---------------------------------------------------------------------------
// SqliteStore instance methods
// ---------------------------------------------------------------------------

impl SqliteStore {
    pub fn put_instance_impl(&self, instance: &Instance, actor: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        insert_instance(&conn, instance, self.audit(actor))
    }

    pub fn get_instance_impl(&self, id: &str) -> Result<Instance> {
        let conn = self.lock_conn()?;
        get_instance_on_conn(&conn, id)
    }

    pub fn list_instances_impl(&self, filter: &InstanceFilter) -> Result<Vec<Instance>> {
        let conn = self.lock_conn()?;
        list_instances_on_conn(&conn, filter)
    }

    pub fn update_instance_impl(
        &self,
        id: &str,
        updates: &InstanceUpdates,
        actor: &str,
    ) -> Result<()> {
        let conn = self.lock_conn()?;
        update_instance_on_conn(&conn, id, updates, self.audit(actor))
    }

    pub fn delete_instance_impl(&self, id: &str) -> Result<usize> {
        let conn = self.lock_conn()?;
        delete_instance_on_conn(&conn, id)
    }
}
