//! Git repository and sync definition tables.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{
    format_timestamp, parse_enum, parse_optional_timestamp, parse_timestamp, Database,
    DatabaseError,
};
use crate::gitops::model::{GitOpsSync, GitRepository, SyncResultRecord};
use crate::gitops::store::{GitOpsStore, RepositoryDeletion};

const REPO_COLUMNS: &str = "id, name, url, auth_type, username, encrypted_token, \
                            encrypted_ssh_key, host_key_policy, description, enabled, \
                            created_at, updated_at";

const SYNC_COLUMNS: &str = "s.id, s.name, s.environment_id, s.repository_id, s.branch, \
                            s.compose_path, s.project_name, s.project_id, s.auto_sync, \
                            s.sync_interval, s.last_sync_at, s.last_sync_status, \
                            s.last_sync_error, s.last_sync_commit, s.created_at, s.updated_at";

#[derive(Debug, Clone)]
struct RepositoryRow {
    id: String,
    name: String,
    url: String,
    auth_type: String,
    username: Option<String>,
    encrypted_token: Option<String>,
    encrypted_ssh_key: Option<String>,
    host_key_policy: String,
    description: Option<String>,
    enabled: bool,
    created_at: String,
    updated_at: String,
}

impl RepositoryRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            url: row.get(2)?,
            auth_type: row.get(3)?,
            username: row.get(4)?,
            encrypted_token: row.get(5)?,
            encrypted_ssh_key: row.get(6)?,
            host_key_policy: row.get(7)?,
            description: row.get(8)?,
            enabled: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn into_repository(self) -> Result<GitRepository, DatabaseError> {
        Ok(GitRepository {
            auth_type: parse_enum("auth_type", &self.auth_type)?,
            host_key_policy: parse_enum("host_key_policy", &self.host_key_policy)?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            id: self.id,
            name: self.name,
            url: self.url,
            username: self.username,
            encrypted_token: self.encrypted_token,
            encrypted_ssh_key: self.encrypted_ssh_key,
            description: self.description,
            enabled: self.enabled,
        })
    }
}

#[derive(Debug, Clone)]
struct SyncRow {
    id: String,
    name: String,
    environment_id: String,
    repository_id: String,
    branch: String,
    compose_path: String,
    project_name: String,
    project_id: Option<String>,
    auto_sync: bool,
    sync_interval: u32,
    last_sync_at: Option<String>,
    last_sync_status: Option<String>,
    last_sync_error: Option<String>,
    last_sync_commit: Option<String>,
    created_at: String,
    updated_at: String,
}

impl SyncRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            environment_id: row.get(2)?,
            repository_id: row.get(3)?,
            branch: row.get(4)?,
            compose_path: row.get(5)?,
            project_name: row.get(6)?,
            project_id: row.get(7)?,
            auto_sync: row.get(8)?,
            sync_interval: row.get(9)?,
            last_sync_at: row.get(10)?,
            last_sync_status: row.get(11)?,
            last_sync_error: row.get(12)?,
            last_sync_commit: row.get(13)?,
            created_at: row.get(14)?,
            updated_at: row.get(15)?,
        })
    }

    fn into_sync(self) -> Result<GitOpsSync, DatabaseError> {
        Ok(GitOpsSync {
            last_sync_at: parse_optional_timestamp("last_sync_at", self.last_sync_at)?,
            last_sync_status: self
                .last_sync_status
                .as_deref()
                .map(|s| parse_enum("last_sync_status", s))
                .transpose()?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            id: self.id,
            name: self.name,
            environment_id: self.environment_id,
            repository_id: self.repository_id,
            branch: self.branch,
            compose_path: self.compose_path,
            project_name: self.project_name,
            project_id: self.project_id,
            auto_sync: self.auto_sync,
            sync_interval: self.sync_interval,
            last_sync_error: self.last_sync_error,
            last_sync_commit: self.last_sync_commit,
        })
    }
}

fn query_syncs(
    conn: &Connection,
    joins_and_filter: &str,
    args: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<GitOpsSync>, DatabaseError> {
    let sql = format!(
        "SELECT {} FROM gitops_syncs s {} ORDER BY s.created_at ASC, s.id ASC",
        SYNC_COLUMNS, joins_and_filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(args, SyncRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(SyncRow::into_sync).collect()
}

fn count_where(conn: &Connection, column: &str, value: &str) -> Result<u64, DatabaseError> {
    let sql = format!("SELECT COUNT(*) FROM gitops_syncs WHERE {} = ?1", column);
    let count: i64 = conn.query_row(&sql, params![value], |r| r.get(0))?;
    Ok(count as u64)
}

impl GitOpsStore for Database {
    fn create_repository(&self, repo: &GitRepository) -> Result<(), DatabaseError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO git_repositories (id, name, url, auth_type, username, encrypted_token,
                                               encrypted_ssh_key, host_key_policy, description,
                                               enabled, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    repo.id,
                    repo.name,
                    repo.url,
                    repo.auth_type.as_str(),
                    repo.username,
                    repo.encrypted_token,
                    repo.encrypted_ssh_key,
                    repo.host_key_policy.as_str(),
                    repo.description,
                    repo.enabled,
                    format_timestamp(&repo.created_at),
                    format_timestamp(&repo.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    fn get_repository(&self, id: &str) -> Result<Option<GitRepository>, DatabaseError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM git_repositories WHERE id = ?1", REPO_COLUMNS);
            let row = conn
                .query_row(&sql, params![id], RepositoryRow::from_row)
                .optional()?;
            row.map(RepositoryRow::into_repository).transpose()
        })
    }

    fn list_repositories(&self) -> Result<Vec<GitRepository>, DatabaseError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM git_repositories ORDER BY name ASC",
                REPO_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], RepositoryRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(RepositoryRow::into_repository).collect()
        })
    }

    fn update_repository(&self, repo: &GitRepository) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE git_repositories SET
                   name = ?2, url = ?3, auth_type = ?4, username = ?5, encrypted_token = ?6,
                   encrypted_ssh_key = ?7, host_key_policy = ?8, description = ?9,
                   enabled = ?10, updated_at = ?11
                 WHERE id = ?1",
                params![
                    repo.id,
                    repo.name,
                    repo.url,
                    repo.auth_type.as_str(),
                    repo.username,
                    repo.encrypted_token,
                    repo.encrypted_ssh_key,
                    repo.host_key_policy.as_str(),
                    repo.description,
                    repo.enabled,
                    format_timestamp(&repo.updated_at),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    fn delete_repository_if_unused(&self, id: &str) -> Result<RepositoryDeletion, DatabaseError> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let in_use = count_where(&tx, "repository_id", id)?;
            if in_use > 0 {
                return Ok(RepositoryDeletion::InUse(in_use));
            }
            let changed = tx.execute("DELETE FROM git_repositories WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(if changed > 0 {
                RepositoryDeletion::Deleted
            } else {
                RepositoryDeletion::NotFound
            })
        })
    }

    fn create_sync(&self, sync: &GitOpsSync) -> Result<(), DatabaseError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO gitops_syncs (id, name, environment_id, repository_id, branch,
                                           compose_path, project_name, project_id, auto_sync,
                                           sync_interval, last_sync_at, last_sync_status,
                                           last_sync_error, last_sync_commit, created_at,
                                           updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    sync.id,
                    sync.name,
                    sync.environment_id,
                    sync.repository_id,
                    sync.branch,
                    sync.compose_path,
                    sync.project_name,
                    sync.project_id,
                    sync.auto_sync,
                    sync.sync_interval,
                    sync.last_sync_at.as_ref().map(format_timestamp),
                    sync.last_sync_status.map(|s| s.as_str()),
                    sync.last_sync_error,
                    sync.last_sync_commit,
                    format_timestamp(&sync.created_at),
                    format_timestamp(&sync.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    fn get_sync(&self, id: &str) -> Result<Option<GitOpsSync>, DatabaseError> {
        self.with_conn(|conn| {
            let mut syncs = query_syncs(conn, "WHERE s.id = ?1", &[&id])?;
            Ok(syncs.pop())
        })
    }

    fn list_syncs(&self) -> Result<Vec<GitOpsSync>, DatabaseError> {
        self.with_conn(|conn| query_syncs(conn, "", &[]))
    }

    fn list_auto_syncs(&self) -> Result<Vec<GitOpsSync>, DatabaseError> {
        self.with_conn(|conn| {
            query_syncs(
                conn,
                "JOIN environments e ON e.id = s.environment_id
                 JOIN git_repositories r ON r.id = s.repository_id
                 WHERE s.auto_sync = 1 AND e.enabled = 1 AND r.enabled = 1",
                &[],
            )
        })
    }

    fn update_sync_definition(&self, sync: &GitOpsSync) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE gitops_syncs SET
                   name = ?2, repository_id = ?3, branch = ?4, compose_path = ?5,
                   project_name = ?6, auto_sync = ?7, sync_interval = ?8, updated_at = ?9
                 WHERE id = ?1",
                params![
                    sync.id,
                    sync.name,
                    sync.repository_id,
                    sync.branch,
                    sync.compose_path,
                    sync.project_name,
                    sync.auto_sync,
                    sync.sync_interval,
                    format_timestamp(&sync.updated_at),
                ],
            )?;
            Ok(changed > 0)
        })
    }

    fn set_sync_project(
        &self,
        id: &str,
        project_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE gitops_syncs SET project_id = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, project_id, format_timestamp(&now)],
            )?;
            Ok(changed > 0)
        })
    }

    fn record_sync_result(
        &self,
        id: &str,
        record: &SyncResultRecord,
    ) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE gitops_syncs SET
                   last_sync_at = ?2,
                   last_sync_status = ?3,
                   last_sync_error = ?4,
                   last_sync_commit = COALESCE(?5, last_sync_commit),
                   updated_at = ?2
                 WHERE id = ?1",
                params![
                    id,
                    format_timestamp(&record.at),
                    record.status.as_str(),
                    record.error,
                    record.commit,
                ],
            )?;
            Ok(changed > 0)
        })
    }

    fn delete_sync(&self, id: &str) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM gitops_syncs WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
    }

    fn count_syncs_for_repository(&self, repository_id: &str) -> Result<u64, DatabaseError> {
        self.with_conn(|conn| count_where(conn, "repository_id", repository_id))
    }

    fn count_syncs_for_environment(&self, environment_id: &str) -> Result<u64, DatabaseError> {
        self.with_conn(|conn| count_where(conn, "environment_id", environment_id))
    }
}
