//! Unit of work: connection scope, change tracker and commit boundary.
//!
//! # Responsibility
//! - Own one SQLite connection and one change tracker for its lifetime.
//! - Flush tracked changes as a single retried, atomic commit.
//! - Release the connection exactly once, on every exit path.
//!
//! # Invariants
//! - Confined to one logical thread of control; not shared across threads.
//! - Tracker state changes after a commit only when the store transaction committed.
//! - Disposing twice is a no-op; any other use after disposal fails with `Disposed`.

pub mod change_tracker;
pub mod commit;
pub mod execution_strategy;

use crate::db::migrations::{current_user_version, latest_version};
use crate::model::entity::TableEntity;
use crate::repo::error::{RepoError, RepoResult};
use change_tracker::ChangeTracker;
use execution_strategy::ExecutionStrategy;
use log::{debug, error, info, warn};
use rusqlite::Connection;
use std::time::Instant;
use uuid::Uuid;

/// Tracked scope over one connection for entities of type `E`.
pub struct UnitOfWork<E: TableEntity> {
    id: Uuid,
    conn: Option<Connection>,
    tracker: ChangeTracker<E>,
    strategy: ExecutionStrategy,
}

impl<E: TableEntity> UnitOfWork<E> {
    /// Creates a unit of work over a migrated connection.
    ///
    /// # Errors
    /// - `InvalidData` when the schema version or `E`'s table layout does not match.
    pub fn new(conn: Connection, strategy: ExecutionStrategy) -> RepoResult<Self> {
        ensure_table_ready::<E>(&conn)?;
        let id = Uuid::new_v4();
        debug!(
            "event=uow_open module=context status=ok uow_id={id} table={} max_retry_count={}",
            E::TABLE,
            strategy.max_retry_count()
        );
        Ok(Self {
            id,
            conn: Some(conn),
            tracker: ChangeTracker::new(),
            strategy,
        })
    }

    /// Correlation id used in log events.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_disposed(&self) -> bool {
        self.conn.is_none()
    }

    pub fn connection(&self) -> RepoResult<&Connection> {
        self.conn.as_ref().ok_or(RepoError::Disposed)
    }

    pub fn tracker(&self) -> &ChangeTracker<E> {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> RepoResult<&mut ChangeTracker<E>> {
        if self.conn.is_none() {
            return Err(RepoError::Disposed);
        }
        Ok(&mut self.tracker)
    }

    pub fn strategy(&self) -> &ExecutionStrategy {
        &self.strategy
    }

    /// Flushes all pending changes through the execution strategy.
    ///
    /// Returns the number of rows affected. On failure the tracker is left
    /// untouched, so every pending change is still pending.
    pub fn save_changes(&mut self) -> RepoResult<usize> {
        let conn = self.conn.as_ref().ok_or(RepoError::Disposed)?;
        let pending = self.tracker.pending_changes();
        if pending.is_empty() {
            debug!(
                "event=save_changes module=context status=ok uow_id={} table={} rows=0",
                self.id,
                E::TABLE
            );
            return Ok(0);
        }

        let started_at = Instant::now();
        info!(
            "event=save_changes module=context status=start uow_id={} table={} pending={}",
            self.id,
            E::TABLE,
            pending.len()
        );

        match self
            .strategy
            .execute(|| commit::apply_batch::<E>(conn, &pending))
        {
            Ok(outcome) => {
                self.tracker.accept_changes(&outcome.applied);
                info!(
                    "event=save_changes module=context status=ok uow_id={} table={} rows={} duration_ms={}",
                    self.id,
                    E::TABLE,
                    outcome.rows_affected,
                    started_at.elapsed().as_millis()
                );
                Ok(outcome.rows_affected)
            }
            Err(RepoError::Concurrency(conflict)) => {
                warn!(
                    "event=save_changes module=context status=error uow_id={} table={} duration_ms={} error_code=concurrency_conflict conflicting_ids={:?}",
                    self.id,
                    E::TABLE,
                    started_at.elapsed().as_millis(),
                    conflict.ids()
                );
                Err(RepoError::Concurrency(conflict))
            }
            Err(err) => {
                error!(
                    "event=save_changes module=context status=error uow_id={} table={} duration_ms={} error_code={} error={}",
                    self.id,
                    E::TABLE,
                    started_at.elapsed().as_millis(),
                    err.code(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Releases the connection. Idempotent.
    pub fn dispose(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let discarded = self.tracker.pending_changes().len();
        self.tracker = ChangeTracker::new();

        match conn.close() {
            Ok(()) => info!(
                "event=uow_dispose module=context status=ok uow_id={} discarded_changes={discarded}",
                self.id
            ),
            Err((_, err)) => warn!(
                "event=uow_dispose module=context status=error uow_id={} error_code=close_failed error={}",
                self.id, err
            ),
        }
    }
}

impl<E: TableEntity> Drop for UnitOfWork<E> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn ensure_table_ready<E: TableEntity>(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(RepoError::InvalidData(format!(
            "unit of work requires schema version {expected_version}, got {actual_version}"
        )));
    }

    let mut columns = Vec::new();
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", E::TABLE))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        columns.push(row.get::<_, String>(1)?);
    }
    if columns.is_empty() {
        return Err(RepoError::InvalidData(format!(
            "required table `{}` is missing",
            E::TABLE
        )));
    }

    for column in ["id", "row_version"].iter().chain(E::COLUMNS) {
        if !columns.iter().any(|existing| existing == column) {
            return Err(RepoError::InvalidData(format!(
                "required column `{column}` is missing from table `{}`",
                E::TABLE
            )));
        }
    }

    Ok(())
}
