//! Project repository: the `projects` table.
//!
//! Compose and env content is stored alongside the metadata so a sync can
//! diff against what was last written without touching the remote host.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::projects::model::{Project, ProjectContent, ProjectUpdate};
use crate::projects::store::ProjectStore;

const COLUMNS: &str = "id, environment_id, name, path, gitops_managed_by, created_at, updated_at";

#[derive(Debug, Clone)]
struct ProjectRow {
    id: String,
    environment_id: String,
    name: String,
    path: String,
    gitops_managed_by: Option<String>,
    created_at: String,
    updated_at: String,
}

impl ProjectRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get(0)?,
            environment_id: row.get(1)?,
            name: row.get(2)?,
            path: row.get(3)?,
            gitops_managed_by: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    fn into_project(self) -> Result<Project, DatabaseError> {
        Ok(Project {
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            id: self.id,
            environment_id: self.environment_id,
            name: self.name,
            path: self.path,
            gitops_managed_by: self.gitops_managed_by,
        })
    }
}

fn find_in(conn: &Connection, id: &str) -> Result<Option<Project>, DatabaseError> {
    let sql = format!("SELECT {} FROM projects WHERE id = ?1", COLUMNS);
    let row = conn
        .query_row(&sql, params![id], ProjectRow::from_row)
        .optional()?;
    row.map(ProjectRow::into_project).transpose()
}

impl ProjectStore for Database {
    fn create_project(
        &self,
        project: &Project,
        content: &ProjectContent,
    ) -> Result<(), DatabaseError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO projects (id, environment_id, name, path, compose_content, env_content,
                                       gitops_managed_by, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    project.id,
                    project.environment_id,
                    project.name,
                    project.path,
                    content.compose,
                    content.env,
                    project.gitops_managed_by,
                    format_timestamp(&project.created_at),
                    format_timestamp(&project.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    fn get_project(&self, id: &str) -> Result<Option<Project>, DatabaseError> {
        self.with_conn(|conn| find_in(conn, id))
    }

    fn find_project_by_name(
        &self,
        environment_id: &str,
        name: &str,
    ) -> Result<Option<Project>, DatabaseError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM projects WHERE environment_id = ?1 AND name = ?2",
                COLUMNS
            );
            let row = conn
                .query_row(&sql, params![environment_id, name], ProjectRow::from_row)
                .optional()?;
            row.map(ProjectRow::into_project).transpose()
        })
    }

    fn list_projects(&self, environment_id: &str) -> Result<Vec<Project>, DatabaseError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM projects WHERE environment_id = ?1 ORDER BY name ASC",
                COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![environment_id], ProjectRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(ProjectRow::into_project).collect()
        })
    }

    fn get_project_content(&self, id: &str) -> Result<Option<ProjectContent>, DatabaseError> {
        self.with_conn(|conn| {
            let content = conn
                .query_row(
                    "SELECT compose_content, env_content FROM projects WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(ProjectContent {
                            compose: row.get(0)?,
                            env: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(content)
        })
    }

    fn update_project(
        &self,
        id: &str,
        update: &ProjectUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Project>, DatabaseError> {
        self.with_conn(|conn| {
            let mut sets: Vec<String> = Vec::new();
            let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if let Some(name) = &update.name {
                values.push(Box::new(name.clone()));
                sets.push(format!("name = ?{}", values.len()));
            }
            if let Some(compose) = &update.compose {
                values.push(Box::new(compose.clone()));
                sets.push(format!("compose_content = ?{}", values.len()));
            }
            if let Some(env) = update.env.as_write() {
                values.push(Box::new(env.cloned()));
                sets.push(format!("env_content = ?{}", values.len()));
            }
            values.push(Box::new(format_timestamp(&now)));
            sets.push(format!("updated_at = ?{}", values.len()));

            values.push(Box::new(id.to_string()));
            let sql = format!(
                "UPDATE projects SET {} WHERE id = ?{}",
                sets.join(", "),
                values.len()
            );
            let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                values.iter().map(|v| v.as_ref()).collect();

            if conn.execute(&sql, params_ref.as_slice())? == 0 {
                return Ok(None);
            }
            find_in(conn, id)
        })
    }

    fn set_gitops_managed_by(
        &self,
        id: &str,
        sync_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE projects SET gitops_managed_by = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, sync_id, format_timestamp(&now)],
            )?;
            Ok(changed > 0)
        })
    }

    fn clear_gitops_managed_by_if(
        &self,
        id: &str,
        sync_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE projects SET gitops_managed_by = NULL, updated_at = ?3
                 WHERE id = ?1 AND gitops_managed_by = ?2",
                params![id, sync_id, format_timestamp(&now)],
            )?;
            Ok(changed > 0)
        })
    }

    fn delete_project(&self, id: &str) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
            Ok(changed > 0)
        })
    }
}
