//! Audit event repository: the `events` table.

use rusqlite::params;

use super::{format_timestamp, Database, DatabaseError};
use crate::audit::AuditEvent;

/// A raw event row, as stored.
#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: String,
    pub event_type: String,
    pub severity: String,
    pub title: String,
    pub description: String,
    /// JSON array of resource references.
    pub resources: String,
    pub created_at: String,
}

/// Inserts an audit event.
pub fn insert(db: &Database, event: &AuditEvent) -> Result<String, DatabaseError> {
    let id = uuid::Uuid::new_v4().to_string();
    let resources =
        serde_json::to_string(&event.resources).map_err(|e| DatabaseError::InvalidValue {
            column: "resources",
            reason: e.to_string(),
        })?;

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO events (id, event_type, severity, title, description, resources, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                event.event_type,
                event.severity.as_str(),
                event.title,
                event.description,
                resources,
                format_timestamp(&event.created_at),
            ],
        )?;
        Ok(())
    })?;

    Ok(id)
}

/// Lists the most recent events, newest first.
pub fn list_recent(db: &Database, limit: u32) -> Result<Vec<EventRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, event_type, severity, title, description, resources, created_at
             FROM events ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(EventRow {
                    id: row.get(0)?,
                    event_type: row.get(1)?,
                    severity: row.get(2)?,
                    title: row.get(3)?,
                    description: row.get(4)?,
                    resources: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{event_types, ResourceRef, Severity};

    #[test]
    fn test_insert_and_list() {
        let db = Database::open_in_memory().unwrap();
        let event = AuditEvent::new(event_types::GITOPS_SYNC_SUCCESS, Severity::Success, "Synced")
            .resource(ResourceRef::new("gitops_sync", "s1", Some("web")));
        insert(&db, &event).unwrap();
        insert(
            &db,
            &AuditEvent::new(event_types::GITOPS_SYNC_FAILED, Severity::Error, "Failed"),
        )
        .unwrap();

        let rows = list_recent(&db, 10).unwrap();
        assert_eq!(rows.len(), 2);
        let synced = rows.iter().find(|r| r.title == "Synced").unwrap();
        assert_eq!(synced.severity, "success");
        assert!(synced.resources.contains("\"gitops_sync\""));

        assert_eq!(list_recent(&db, 1).unwrap().len(), 1);
    }
}
