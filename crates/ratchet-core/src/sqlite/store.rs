use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};

use crate::models::MigrationError;
use crate::persistence::{PatchInfoStore, PersistenceResult};

const STATE_TABLE: &str = "ratchet_patch_state";
const APPLIED_TABLE: &str = "ratchet_applied_patches";

/// Durable `PatchInfoStore`: one row per (subsystem, context) plus one row
/// per applied patch level.
///
/// `acquire_lock` is a single conditional `UPDATE ... WHERE lock_held = 0`,
/// so two racing processes cannot both win; everything beyond that single
/// statement stays a cooperative polling protocol, as the launcher expects.
pub struct SqlitePatchStore {
    database_path: PathBuf,
    subsystem: String,
    context: String,
}

impl SqlitePatchStore {
    pub fn new(
        database_path: impl Into<PathBuf>,
        subsystem: impl Into<String>,
        context: impl Into<String>,
    ) -> Self {
        Self {
            database_path: database_path.into(),
            subsystem: subsystem.into(),
            context: context.into(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.database_path)
            .map_err(|error| self.storage_error(operation_name, error.to_string()))?;
        operation(&mut connection)
            .map_err(|error| self.storage_error(operation_name, error.to_string()))
    }

    fn storage_error(&self, operation: &str, message: impl AsRef<str>) -> MigrationError {
        MigrationError::storage(format!(
            "sqlite patch store '{operation}' failed for '{}/{}': {}",
            self.subsystem,
            self.context,
            message.as_ref()
        ))
        .for_subsystem(&self.subsystem)
    }

    fn key_params(&self) -> (&str, &str) {
        (self.subsystem.as_str(), self.context.as_str())
    }
}

impl PatchInfoStore for SqlitePatchStore {
    fn subsystem(&self) -> &str {
        &self.subsystem
    }

    fn context(&self) -> &str {
        &self.context
    }

    fn ensure_initialized(&self) -> PersistenceResult<()> {
        let (subsystem, context) = self.key_params();
        self.with_connection("ensure_initialized", |connection| {
            ensure_schema(connection)?;
            connection.execute(
                &format!(
                    "INSERT OR IGNORE INTO {STATE_TABLE}
                         (subsystem, context, patch_level, lock_held, updated_at_unix)
                     VALUES (?1, ?2, 0, 0, strftime('%s', 'now'))"
                ),
                params![subsystem, context],
            )?;
            Ok(())
        })
    }

    fn current_level(&self) -> PersistenceResult<i64> {
        let (subsystem, context) = self.key_params();
        self.with_connection("current_level", |connection| {
            ensure_schema(connection)?;
            let level: Option<i64> = connection
                .query_row(
                    &format!(
                        "SELECT patch_level FROM {STATE_TABLE}
                         WHERE subsystem = ?1 AND context = ?2"
                    ),
                    params![subsystem, context],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(level.unwrap_or(0))
        })
    }

    fn is_applied(&self, level: i64) -> PersistenceResult<bool> {
        let (subsystem, context) = self.key_params();
        self.with_connection("is_applied", |connection| {
            ensure_schema(connection)?;
            let found: Option<i64> = connection
                .query_row(
                    &format!(
                        "SELECT 1 FROM {APPLIED_TABLE}
                         WHERE subsystem = ?1 AND context = ?2 AND patch_level = ?3"
                    ),
                    params![subsystem, context, level],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    fn applied_levels(&self) -> PersistenceResult<Vec<i64>> {
        let (subsystem, context) = self.key_params();
        self.with_connection("applied_levels", |connection| {
            ensure_schema(connection)?;
            let mut statement = connection.prepare(&format!(
                "SELECT patch_level FROM {APPLIED_TABLE}
                 WHERE subsystem = ?1 AND context = ?2
                 ORDER BY patch_level ASC"
            ))?;
            let rows = statement.query_map(params![subsystem, context], |row| row.get(0))?;
            rows.collect()
        })
    }

    fn advance_level(&self, level: i64) -> PersistenceResult<()> {
        let (subsystem, context) = self.key_params();
        self.with_connection("advance_level", |connection| {
            ensure_schema(connection)?;
            let transaction = connection.transaction()?;
            transaction.execute(
                &format!(
                    "INSERT OR IGNORE INTO {STATE_TABLE}
                         (subsystem, context, patch_level, lock_held, updated_at_unix)
                     VALUES (?1, ?2, 0, 0, strftime('%s', 'now'))"
                ),
                params![subsystem, context],
            )?;
            transaction.execute(
                &format!(
                    "INSERT OR IGNORE INTO {APPLIED_TABLE}
                         (subsystem, context, patch_level, applied_at_unix)
                     VALUES (?1, ?2, ?3, strftime('%s', 'now'))"
                ),
                params![subsystem, context, level],
            )?;
            transaction.execute(
                &format!(
                    "UPDATE {STATE_TABLE}
                     SET patch_level = MAX(patch_level, ?3),
                         updated_at_unix = strftime('%s', 'now')
                     WHERE subsystem = ?1 AND context = ?2"
                ),
                params![subsystem, context, level],
            )?;
            transaction.commit()?;
            Ok(())
        })
    }

    fn revert_level(&self, rolled_back: i64, target: i64) -> PersistenceResult<()> {
        let (subsystem, context) = self.key_params();
        self.with_connection("revert_level", |connection| {
            ensure_schema(connection)?;
            let transaction = connection.transaction()?;
            transaction.execute(
                &format!(
                    "DELETE FROM {APPLIED_TABLE}
                     WHERE subsystem = ?1 AND context = ?2 AND patch_level = ?3"
                ),
                params![subsystem, context, rolled_back],
            )?;
            transaction.execute(
                &format!(
                    "UPDATE {STATE_TABLE}
                     SET patch_level = ?3, updated_at_unix = strftime('%s', 'now')
                     WHERE subsystem = ?1 AND context = ?2"
                ),
                params![subsystem, context, target],
            )?;
            transaction.commit()?;
            Ok(())
        })
    }

    fn is_locked(&self) -> PersistenceResult<bool> {
        let (subsystem, context) = self.key_params();
        self.with_connection("is_locked", |connection| {
            ensure_schema(connection)?;
            let held: Option<i64> = connection
                .query_row(
                    &format!(
                        "SELECT lock_held FROM {STATE_TABLE}
                         WHERE subsystem = ?1 AND context = ?2"
                    ),
                    params![subsystem, context],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(held.unwrap_or(0) != 0)
        })
    }

    fn acquire_lock(&self) -> PersistenceResult<()> {
        let (subsystem, context) = self.key_params();
        let updated = self.with_connection("acquire_lock", |connection| {
            ensure_schema(connection)?;
            connection.execute(
                &format!(
                    "INSERT OR IGNORE INTO {STATE_TABLE}
                         (subsystem, context, patch_level, lock_held, updated_at_unix)
                     VALUES (?1, ?2, 0, 0, strftime('%s', 'now'))"
                ),
                params![subsystem, context],
            )?;
            connection.execute(
                &format!(
                    "UPDATE {STATE_TABLE}
                     SET lock_held = 1, updated_at_unix = strftime('%s', 'now')
                     WHERE subsystem = ?1 AND context = ?2 AND lock_held = 0"
                ),
                params![subsystem, context],
            )
        })?;

        if updated == 0 {
            return Err(MigrationError::state(format!(
                "patch record for '{}/{}' is already locked",
                self.subsystem, self.context
            ))
            .for_subsystem(&self.subsystem));
        }
        Ok(())
    }

    fn release_lock(&self) -> PersistenceResult<()> {
        let (subsystem, context) = self.key_params();
        self.with_connection("release_lock", |connection| {
            ensure_schema(connection)?;
            connection.execute(
                &format!(
                    "UPDATE {STATE_TABLE}
                     SET lock_held = 0, updated_at_unix = strftime('%s', 'now')
                     WHERE subsystem = ?1 AND context = ?2"
                ),
                params![subsystem, context],
            )?;
            Ok(())
        })
    }
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    let connection = Connection::open(database_path)?;
    connection.busy_timeout(std::time::Duration::from_secs(5))?;
    Ok(connection)
}

fn ensure_schema(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {STATE_TABLE} (
    subsystem TEXT NOT NULL,
    context TEXT NOT NULL,
    patch_level INTEGER NOT NULL DEFAULT 0,
    lock_held INTEGER NOT NULL DEFAULT 0,
    updated_at_unix INTEGER NOT NULL,
    PRIMARY KEY (subsystem, context)
);

CREATE TABLE IF NOT EXISTS {APPLIED_TABLE} (
    subsystem TEXT NOT NULL,
    context TEXT NOT NULL,
    patch_level INTEGER NOT NULL,
    applied_at_unix INTEGER NOT NULL,
    PRIMARY KEY (subsystem, context, patch_level)
);
"
    ))
}
