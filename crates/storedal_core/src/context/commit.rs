//! Translation of pending changes into conditional SQL writes.
//!
//! # Responsibility
//! - Apply one batch of pending changes inside a single immediate transaction.
//! - Detect version-precondition failures and report them per entity.
//! - Read store-generated identities and versions back with `RETURNING`.
//!
//! # Invariants
//! - Updates and deletes always carry `AND row_version = ?`.
//! - A batch with any conflict or SQL failure is rolled back in full.

use crate::context::change_tracker::{AppliedChange, PendingChange};
use crate::model::entity::{EntityState, RowVersion, TableEntity};
use crate::repo::error::{ConcurrencyConflict, ConflictEntry, ConflictOperation, RepoResult};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Row, Transaction, TransactionBehavior,
};

/// Result of one committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub rows_affected: usize,
    pub applied: Vec<AppliedChange>,
}

/// Applies `pending` atomically.
///
/// Conflicting writes are collected across the whole batch before rollback
/// so the report names every rejected entity.
pub fn apply_batch<E: TableEntity>(
    conn: &Connection,
    pending: &[PendingChange<E>],
) -> RepoResult<BatchOutcome> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let mut applied = Vec::with_capacity(pending.len());
    let mut conflicts = Vec::new();

    for change in pending {
        match change.state {
            EntityState::Added => {
                let (id, version) = insert_row(&tx, &change.entity)?;
                applied.push(AppliedChange::Inserted {
                    placeholder: change.key,
                    id,
                    version,
                });
            }
            EntityState::Modified => match update_row(&tx, &change.entity)? {
                Some(version) => applied.push(AppliedChange::Updated {
                    id: change.key,
                    version,
                }),
                None => conflicts.push(conflict_entry(&tx, change, ConflictOperation::Update)?),
            },
            EntityState::Deleted => {
                if delete_row(&tx, &change.entity)? {
                    applied.push(AppliedChange::Deleted { id: change.key });
                } else {
                    conflicts.push(conflict_entry(&tx, change, ConflictOperation::Delete)?);
                }
            }
            EntityState::Detached | EntityState::Unchanged => {}
        }
    }

    if !conflicts.is_empty() {
        return Err(ConcurrencyConflict::new(E::TABLE, conflicts).into());
    }

    tx.commit()?;
    Ok(BatchOutcome {
        rows_affected: applied.len(),
        applied,
    })
}

/// `SELECT id, row_version, <columns> FROM <table>`.
pub fn select_sql<E: TableEntity>() -> String {
    format!(
        "SELECT id, row_version, {} FROM {}",
        E::COLUMNS.join(", "),
        E::TABLE
    )
}

/// Builds an entity from a row produced by `select_sql`.
pub fn read_entity<E: TableEntity>(row: &Row<'_>) -> rusqlite::Result<E> {
    let mut entity = E::read_columns(row)?;
    entity.set_id(row.get("id")?);
    entity.set_version(
        row.get::<_, Option<Vec<u8>>>("row_version")?
            .map(RowVersion::from_bytes),
    );
    Ok(entity)
}

fn insert_row<E: TableEntity>(tx: &Transaction<'_>, entity: &E) -> RepoResult<(i64, RowVersion)> {
    let placeholders = (1..=E::COLUMNS.len())
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders}) RETURNING id, row_version;",
        E::TABLE,
        E::COLUMNS.join(", ")
    );

    let (id, version) = tx.query_row(&sql, params_from_iter(entity.values()), |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
    })?;
    Ok((id, RowVersion::from_bytes(version)))
}

fn update_row<E: TableEntity>(
    tx: &Transaction<'_>,
    entity: &E,
) -> RepoResult<Option<RowVersion>> {
    let assignments = E::COLUMNS
        .iter()
        .enumerate()
        .map(|(index, column)| format!("{column} = ?{}", index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let id_index = E::COLUMNS.len() + 1;
    let sql = format!(
        "UPDATE {}
         SET {assignments}, row_version = randomblob(8)
         WHERE id = ?{id_index}
           AND row_version = ?{}
         RETURNING row_version;",
        E::TABLE,
        id_index + 1
    );

    let mut values = entity.values();
    values.push(Value::Integer(entity.id()));
    values.push(version_value(entity.version()));

    let version = tx
        .query_row(&sql, params_from_iter(values), |row| row.get::<_, Vec<u8>>(0))
        .optional()?;
    Ok(version.map(RowVersion::from_bytes))
}

fn delete_row<E: TableEntity>(tx: &Transaction<'_>, entity: &E) -> RepoResult<bool> {
    let changed = tx.execute(
        &format!(
            "DELETE FROM {}
             WHERE id = ?1
               AND row_version = ?2;",
            E::TABLE
        ),
        params![entity.id(), version_value(entity.version())],
    )?;
    Ok(changed == 1)
}

fn conflict_entry<E: TableEntity>(
    tx: &Transaction<'_>,
    change: &PendingChange<E>,
    operation: ConflictOperation,
) -> RepoResult<ConflictEntry> {
    let current = tx
        .query_row(
            &format!("SELECT row_version FROM {} WHERE id = ?1;", E::TABLE),
            [change.key],
            |row| row.get::<_, Option<Vec<u8>>>(0),
        )
        .optional()?
        .flatten();

    Ok(ConflictEntry {
        id: change.key,
        operation,
        expected_version: change.entity.version().cloned(),
        current_version: current.map(RowVersion::from_bytes),
    })
}

fn version_value(version: Option<&RowVersion>) -> Value {
    match version {
        Some(version) => Value::Blob(version.as_bytes().to_vec()),
        None => Value::Null,
    }
}
