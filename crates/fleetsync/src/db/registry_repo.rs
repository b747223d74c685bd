//! Container registry repository: the `container_registries` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::credentials::model::ContainerRegistry;
use crate::credentials::store::RegistryStore;

const COLUMNS: &str = "id, url, username, encrypted_token, description, insecure, enabled, \
                       created_at, updated_at";

#[derive(Debug, Clone)]
struct RegistryRow {
    id: String,
    url: String,
    username: String,
    encrypted_token: String,
    description: Option<String>,
    insecure: bool,
    enabled: bool,
    created_at: String,
    updated_at: String,
}

impl RegistryRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            username: row.get(2)?,
            encrypted_token: row.get(3)?,
            description: row.get(4)?,
            insecure: row.get(5)?,
            enabled: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    fn into_registry(self) -> Result<ContainerRegistry, DatabaseError> {
        Ok(ContainerRegistry {
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            id: self.id,
            url: self.url,
            username: self.username,
            encrypted_token: self.encrypted_token,
            description: self.description,
            insecure: self.insecure,
            enabled: self.enabled,
        })
    }
}

impl RegistryStore for Database {
    fn create_registry(&self, registry: &ContainerRegistry) -> Result<(), DatabaseError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO container_registries (id, url, username, encrypted_token, description,
                                                   insecure, enabled, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    registry.id,
                    registry.url,
                    registry.username,
                    registry.encrypted_token,
                    registry.description,
                    registry.insecure,
                    registry.enabled,
                    format_timestamp(&registry.created_at),
                    format_timestamp(&registry.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    fn get_registry(&self, id: &str) -> Result<Option<ContainerRegistry>, DatabaseError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM container_registries WHERE id = ?1", COLUMNS);
            let row = conn
                .query_row(&sql, params![id], RegistryRow::from_row)
                .optional()?;
            row.map(RegistryRow::into_registry).transpose()
        })
    }

    fn list_registries(&self) -> Result<Vec<ContainerRegistry>, DatabaseError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM container_registries ORDER BY url ASC, id ASC",
                COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], RegistryRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(RegistryRow::into_registry).collect()
        })
    }

    fn update_registry(&self, registry: &ContainerRegistry) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE container_registries SET
                   url = ?2, username = ?3, encrypted_token = ?4, description = ?5,
                   insecure = ?6, enabled = ?7, updated_at = ?8
                 WHERE id = ?1",
                params![
                    registry.id,
                    registry.url,
                    registry.username,
                    registry.encrypted_token,
                    registry.description,
                    registry.insecure,
                    registry.enabled,
                    format_timestamp(&registry.updated_at),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    fn delete_registry(&self, id: &str) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM container_registries WHERE id = ?1",
                params![id],
            )?;
            Ok(changed > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::storage_precision;
    use chrono::Utc;

    fn sample(id: &str, url: &str) -> ContainerRegistry {
        let now = storage_precision(Utc::now());
        ContainerRegistry {
            id: id.to_string(),
            url: url.to_string(),
            username: "bot".to_string(),
            encrypted_token: "00ff".to_string(),
            description: Some("CI pulls".to_string()),
            insecure: false,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_crud() {
        let db = Database::open_in_memory().unwrap();
        let mut registry = sample("reg-1", "ghcr.io");
        db.create_registry(&registry).unwrap();
        db.create_registry(&sample("reg-2", "docker.io")).unwrap();

        assert_eq!(db.get_registry("reg-1").unwrap().unwrap(), registry);
        let urls: Vec<String> = db
            .list_registries()
            .unwrap()
            .into_iter()
            .map(|r| r.url)
            .collect();
        assert_eq!(urls, vec!["docker.io".to_string(), "ghcr.io".to_string()]);

        registry.enabled = false;
        registry.description = None;
        assert!(db.update_registry(&registry).unwrap());
        assert_eq!(db.get_registry("reg-1").unwrap().unwrap(), registry);

        assert!(db.delete_registry("reg-1").unwrap());
        assert!(db.get_registry("reg-1").unwrap().is_none());
        assert!(!db.delete_registry("reg-1").unwrap());
    }
}
