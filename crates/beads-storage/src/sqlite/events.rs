//! Audit trail operations for [`SqliteStore`].

use chrono::Utc;
use rusqlite::{Connection, Row, params};

use beads_core::enums::EventType;
use beads_core::event::Event;

use crate::error::Result;
use crate::sqlite::store::{Audit, SqliteStore, format_datetime, parse_column, parse_datetime};

/// A pending event; written only when the store is audited.
pub(crate) struct EventRecord<'a> {
    pub entity_id: &'a str,
    pub event_type: EventType,
    pub old_value: Option<&'a str>,
    pub new_value: Option<&'a str>,
    pub comment: Option<&'a str>,
}

impl<'a> EventRecord<'a> {
    pub(crate) fn new(entity_id: &'a str, event_type: EventType) -> Self {
        Self {
            entity_id,
            event_type,
            old_value: None,
            new_value: None,
            comment: None,
        }
    }

    pub(crate) fn change(mut self, old: &'a str, new: &'a str) -> Self {
        self.old_value = Some(old);
        self.new_value = Some(new);
        self
    }

    pub(crate) fn comment(mut self, comment: Option<&'a str>) -> Self {
        self.comment = comment;
        self
    }
}

/// Appends `event` to the trail if `audit` carries an actor.
pub(crate) fn emit_event(conn: &Connection, audit: Audit<'_>, event: EventRecord<'_>) -> Result<()> {
    let Some(actor) = audit else {
        return Ok(());
    };
    conn.execute(
        "INSERT INTO events (entity_id, event_type, actor, old_value, new_value, comment, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.entity_id,
            event.event_type.as_str(),
            actor,
            event.old_value,
            event.new_value,
            event.comment,
            format_datetime(&Utc::now()),
        ],
    )?;
    Ok(())
}

fn scan_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get("id")?,
        entity_id: row.get("entity_id")?,
        event_type: parse_column(2, "event_type", row.get("event_type")?)?,
        actor: row.get("actor")?,
        old_value: row.get("old_value")?,
        new_value: row.get("new_value")?,
        comment: row.get("comment")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
    })
}

impl SqliteStore {
    /// Returns the most recent events for an entity, newest first.
    pub fn get_events_impl(&self, entity_id: &str, limit: u32) -> Result<Vec<Event>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, entity_id, event_type, actor, old_value, new_value, comment, created_at
             FROM events WHERE entity_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![entity_id, limit], scan_event)?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }
}
