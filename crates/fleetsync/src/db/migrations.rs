//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies pending
//! ones in order, each inside its own transaction.

use rusqlite::Connection;

use super::error::DatabaseError;

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_environments_table",
        sql: include_str!("sql/001_create_environments.sql"),
    },
    Migration {
        version: 2,
        description: "create_container_registries_table",
        sql: include_str!("sql/002_create_container_registries.sql"),
    },
    Migration {
        version: 3,
        description: "create_git_repositories_table",
        sql: include_str!("sql/003_create_git_repositories.sql"),
    },
    Migration {
        version: 4,
        description: "create_projects_table",
        sql: include_str!("sql/004_create_projects.sql"),
    },
    Migration {
        version: 5,
        description: "create_gitops_syncs_table",
        sql: include_str!("sql/005_create_gitops_syncs.sql"),
    },
    Migration {
        version: 6,
        description: "create_events_table",
        sql: include_str!("sql/006_create_events.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &mut Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;
        tx.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
        tx.commit()?;
    }

    Ok(())
}
