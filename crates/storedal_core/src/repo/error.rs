//! Repository error taxonomy.
//!
//! # Responsibility
//! - Surface conflicts, retry exhaustion and tracker misuse as matchable variants.
//! - Wrap storage failures without altering them.
//!
//! # Invariants
//! - `Concurrency` lists exactly the entities whose writes were rejected.
//! - `RetryLimitExceeded` always carries the last underlying failure.

use crate::db::DbError;
use crate::model::entity::{EntityId, EntityState, EntityValidationError, RowVersion};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub type RepoResult<T> = Result<T, RepoError>;

/// Write operation whose version precondition failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictOperation {
    Update,
    Delete,
}

/// One rejected write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEntry {
    pub id: EntityId,
    pub operation: ConflictOperation,
    /// Version the caller held when issuing the write.
    pub expected_version: Option<RowVersion>,
    /// Version found in the store, `None` when the row no longer exists or was not read.
    pub current_version: Option<RowVersion>,
}

/// Optimistic concurrency failure for one commit or delete-by-identity call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConflict {
    pub table: String,
    pub entries: Vec<ConflictEntry>,
}

impl ConcurrencyConflict {
    pub fn new(table: impl Into<String>, entries: Vec<ConflictEntry>) -> Self {
        Self {
            table: table.into(),
            entries,
        }
    }

    /// Identities of the rejected rows, in batch order.
    pub fn ids(&self) -> Vec<EntityId> {
        self.entries.iter().map(|entry| entry.id).collect()
    }
}

impl Display for ConcurrencyConflict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "concurrency conflict on `{}`: {} write(s) rejected",
            self.table,
            self.entries.len()
        )?;
        for entry in &self.entries {
            let expected = entry
                .expected_version
                .as_ref()
                .map_or_else(|| "none".to_string(), RowVersion::to_string);
            write!(f, "; id={} expected_version={expected}", entry.id)?;
        }
        Ok(())
    }
}

/// Error type for repository, unit-of-work and execution-strategy operations.
#[derive(Debug)]
pub enum RepoError {
    /// Storage bootstrap or SQL failure.
    Db(DbError),
    /// Version precondition failed; never retried automatically.
    Concurrency(ConcurrencyConflict),
    /// Transient failures outlasted the retry budget.
    RetryLimitExceeded {
        attempts: u32,
        elapsed: Duration,
        last_error: Box<RepoError>,
    },
    /// Update or delete on an entity this unit of work has no record of.
    NotTracked(EntityId),
    /// Add on an entity that is already tracked.
    AlreadyTracked(EntityId),
    /// Requested lifecycle transition is not allowed from the current state.
    InvalidTransition {
        id: EntityId,
        from: EntityState,
        to: EntityState,
    },
    Validation(EntityValidationError),
    /// Connection schema does not match the entity mapping.
    InvalidData(String),
    /// The unit of work has already released its connection.
    Disposed,
}

impl RepoError {
    /// Stable code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Db(_) => "persistence_failed",
            Self::Concurrency(_) => "concurrency_conflict",
            Self::RetryLimitExceeded { .. } => "retry_limit_exceeded",
            Self::NotTracked(_) => "not_tracked",
            Self::AlreadyTracked(_) => "already_tracked",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Validation(_) => "validation_failed",
            Self::InvalidData(_) => "invalid_data",
            Self::Disposed => "disposed",
        }
    }

    /// Returns the conflict report when this is a concurrency failure.
    pub fn as_conflict(&self) -> Option<&ConcurrencyConflict> {
        match self {
            Self::Concurrency(conflict) => Some(conflict),
            _ => None,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Concurrency(conflict) => write!(f, "{conflict}"),
            Self::RetryLimitExceeded {
                attempts,
                elapsed,
                last_error,
            } => write!(
                f,
                "retry limit exceeded after {attempts} attempt(s) in {} ms: {last_error}",
                elapsed.as_millis()
            ),
            Self::NotTracked(id) => write!(f, "entity {id} is not tracked by this unit of work"),
            Self::AlreadyTracked(id) => {
                write!(f, "entity {id} is already tracked by this unit of work")
            }
            Self::InvalidTransition { id, from, to } => {
                write!(f, "entity {id} cannot move from `{from}` to `{to}`")
            }
            Self::Validation(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Disposed => write!(f, "unit of work has been disposed"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::RetryLimitExceeded { last_error, .. } => Some(last_error.as_ref()),
            Self::Validation(err) => Some(err),
            Self::Concurrency(_) => None,
            Self::NotTracked(_) => None,
            Self::AlreadyTracked(_) => None,
            Self::InvalidTransition { .. } => None,
            Self::InvalidData(_) => None,
            Self::Disposed => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<EntityValidationError> for RepoError {
    fn from(value: EntityValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<ConcurrencyConflict> for RepoError {
    fn from(value: ConcurrencyConflict) -> Self {
        Self::Concurrency(value)
    }
}
