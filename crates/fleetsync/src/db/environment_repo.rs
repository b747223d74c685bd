//! Environment repository: the `environments` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{
    format_timestamp, parse_enum, parse_optional_timestamp, parse_timestamp, Database,
    DatabaseError,
};
use crate::environment::model::{
    Environment, EnvironmentPatch, EnvironmentStatus, LOCAL_ENVIRONMENT_ID,
};
use crate::environment::store::EnvironmentStore;

const COLUMNS: &str = "id, name, api_url, is_edge, status, enabled, last_seen, access_token, \
                       api_key_id, created_at, updated_at";

/// A raw environment row from the database.
#[derive(Debug, Clone)]
struct EnvironmentRow {
    id: String,
    name: String,
    api_url: String,
    is_edge: bool,
    status: String,
    enabled: bool,
    last_seen: Option<String>,
    access_token: Option<String>,
    api_key_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl EnvironmentRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            api_url: row.get(2)?,
            is_edge: row.get(3)?,
            status: row.get(4)?,
            enabled: row.get(5)?,
            last_seen: row.get(6)?,
            access_token: row.get(7)?,
            api_key_id: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_environment(self) -> Result<Environment, DatabaseError> {
        Ok(Environment {
            status: parse_enum("status", &self.status)?,
            last_seen: parse_optional_timestamp("last_seen", self.last_seen)?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            id: self.id,
            name: self.name,
            api_url: self.api_url,
            is_edge: self.is_edge,
            enabled: self.enabled,
            access_token: self.access_token,
            api_key_id: self.api_key_id,
        })
    }
}

fn find_in(conn: &Connection, id: &str) -> Result<Option<Environment>, DatabaseError> {
    let sql = format!("SELECT {} FROM environments WHERE id = ?1", COLUMNS);
    let row = conn
        .query_row(&sql, params![id], EnvironmentRow::from_row)
        .optional()?;
    row.map(EnvironmentRow::into_environment).transpose()
}

fn query_all(
    conn: &Connection,
    where_clause: &str,
    args: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<Environment>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM environments {} ORDER BY created_at ASC, id ASC",
        COLUMNS, where_clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(args, EnvironmentRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(EnvironmentRow::into_environment).collect()
}

impl EnvironmentStore for Database {
    fn create(&self, env: &Environment) -> Result<(), DatabaseError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO environments (id, name, api_url, is_edge, status, enabled, last_seen,
                                           access_token, api_key_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    env.id,
                    env.name,
                    env.api_url,
                    env.is_edge,
                    env.status.as_str(),
                    env.enabled,
                    env.last_seen.as_ref().map(format_timestamp),
                    env.access_token,
                    env.api_key_id,
                    format_timestamp(&env.created_at),
                    format_timestamp(&env.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    fn get_by_id(&self, id: &str) -> Result<Option<Environment>, DatabaseError> {
        self.with_conn(|conn| find_in(conn, id))
    }

    fn list(&self) -> Result<Vec<Environment>, DatabaseError> {
        self.with_conn(|conn| query_all(conn, "", &[]))
    }

    fn list_remote(&self) -> Result<Vec<Environment>, DatabaseError> {
        self.with_conn(|conn| {
            query_all(
                conn,
                "WHERE enabled = 1 AND id != ?1",
                &[&LOCAL_ENVIRONMENT_ID],
            )
        })
    }

    fn patch(
        &self,
        id: &str,
        patch: &EnvironmentPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Environment>, DatabaseError> {
        self.with_conn(|conn| {
            let mut sets: Vec<String> = Vec::new();
            let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            let mut push = |column: &str, value: Box<dyn rusqlite::types::ToSql>| {
                values.push(value);
                sets.push(format!("{} = ?{}", column, values.len()));
            };

            if let Some(name) = &patch.name {
                push("name", Box::new(name.clone()));
            }
            if let Some(api_url) = &patch.api_url {
                push("api_url", Box::new(api_url.clone()));
            }
            if let Some(is_edge) = patch.is_edge {
                push("is_edge", Box::new(is_edge));
            }
            if let Some(enabled) = patch.enabled {
                push("enabled", Box::new(enabled));
            }
            if let Some(status) = patch.status {
                push("status", Box::new(status.as_str()));
            }
            if let Some(last_seen) = patch.last_seen.as_write() {
                push("last_seen", Box::new(last_seen.map(format_timestamp)));
            }
            if let Some(token) = patch.access_token.as_write() {
                push("access_token", Box::new(token.cloned()));
            }
            if let Some(key_id) = patch.api_key_id.as_write() {
                push("api_key_id", Box::new(key_id.cloned()));
            }
            push("updated_at", Box::new(format_timestamp(&now)));

            values.push(Box::new(id.to_string()));
            let sql = format!(
                "UPDATE environments SET {} WHERE id = ?{}",
                sets.join(", "),
                values.len()
            );
            let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                values.iter().map(|v| v.as_ref()).collect();

            let changed = conn.execute(&sql, params_ref.as_slice())?;
            if changed == 0 {
                return Ok(None);
            }
            find_in(conn, id)
        })
    }

    fn delete(&self, id: &str) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM environments WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
    }

    fn touch_heartbeat_if_stale(
        &self,
        id: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE environments
                 SET status = CASE WHEN status = 'pending' THEN status ELSE 'online' END,
                     last_seen = ?2,
                     updated_at = ?2
                 WHERE id = ?1 AND (last_seen IS NULL OR last_seen < ?3)",
                params![id, format_timestamp(&now), format_timestamp(&stale_before)],
            )?;
            Ok(changed > 0)
        })
    }

    fn record_probe(
        &self,
        id: &str,
        status: EnvironmentStatus,
        seen_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE environments
                 SET status = ?2,
                     last_seen = COALESCE(?3, last_seen),
                     updated_at = ?4
                 WHERE id = ?1 AND status != 'pending'",
                params![
                    id,
                    status.as_str(),
                    seen_at.as_ref().map(format_timestamp),
                    format_timestamp(&now),
                ],
            )?;
            Ok(changed > 0)
        })
    }
}
