//! Step dependency edges for [`SqliteStore`].
//!
//! Acyclicity is the caller's concern: edges are validated as a whole graph
//! before any of them is written.

use rusqlite::{Connection, Row, params};

use beads_core::dependency::StepDependency;

use crate::error::{Result, StorageError};
use crate::sqlite::store::{SqliteStore, format_datetime, parse_datetime};

fn scan_dependency(row: &Row<'_>) -> rusqlite::Result<StepDependency> {
    Ok(StepDependency {
        step_id: row.get("step_id")?,
        depends_on_id: row.get("depends_on_id")?,
        instance_id: row.get("instance_id")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
    })
}

pub(crate) fn add_dependency_on_conn(conn: &Connection, dep: &StepDependency) -> Result<()> {
    if dep.step_id == dep.depends_on_id {
        return Err(StorageError::validation(format!(
            "step {} cannot depend on itself",
            dep.step_id
        )));
    }
    conn.execute(
        "INSERT OR IGNORE INTO step_dependencies (step_id, depends_on_id, instance_id, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            dep.step_id,
            dep.depends_on_id,
            dep.instance_id,
            format_datetime(&dep.created_at),
        ],
    )?;
    Ok(())
}

pub(crate) fn list_dependencies_on_conn(
    conn: &Connection,
    instance_id: &str,
) -> Result<Vec<StepDependency>> {
    let mut stmt = conn.prepare(
        "SELECT step_id, depends_on_id, instance_id, created_at
         FROM step_dependencies WHERE instance_id = ?1
         ORDER BY step_id, depends_on_id",
    )?;
    let rows = stmt.query_map(params![instance_id], scan_dependency)?;
    let mut deps = Vec::new();
    for row in rows {
        deps.push(row?);
    }
    Ok(deps)
}

impl SqliteStore {
    pub fn add_dependency_impl(&self, dep: &StepDependency) -> Result<()> {
        let conn = self.lock_conn()?;
        add_dependency_on_conn(&conn, dep)
    }

    pub fn list_dependencies_impl(&self, instance_id: &str) -> Result<Vec<StepDependency>> {
        let conn = self.lock_conn()?;
        list_dependencies_on_conn(&conn, instance_id)
    }
}
