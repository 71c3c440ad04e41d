//! Generic CRUD repository over a unit of work.
//!
//! # Responsibility
//! - Expose the CRUD contract for any `TableEntity`.
//! - Route every mutation through the change tracker and every commit
//!   through the unit of work's execution strategy.
//!
//! # Invariants
//! - Add/Update validate the entity before any state transition.
//! - With `persist = true`, refreshed identity/version are written back into
//!   the caller's entity only after the commit succeeded.
//! - Delete-by-identity never reaches the store with a token known to mismatch.

use crate::context::commit::{read_entity, select_sql};
use crate::context::UnitOfWork;
use crate::model::entity::{EntityId, EntityState, RowVersion, TableEntity};
use crate::repo::error::{
    ConcurrencyConflict, ConflictEntry, ConflictOperation, RepoError, RepoResult,
};
use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::params_from_iter;

/// CRUD contract shared by every entity repository.
pub trait Repository<E: TableEntity> {
    /// Looks up one entity by identity; `None` when no row matches.
    fn find(&mut self, id: EntityId) -> RepoResult<Option<E>>;
    /// First entity in identity order.
    fn get_first(&mut self) -> RepoResult<Option<E>>;
    /// All entities in identity order.
    fn get_all(&mut self) -> RepoResult<Vec<E>>;
    /// Up to `take` entities after skipping `skip`, in identity order.
    fn get_range(&mut self, skip: u32, take: u32) -> RepoResult<Vec<E>>;
    /// Number of stored rows.
    fn count(&mut self) -> RepoResult<u64>;

    fn add(&mut self, entity: &mut E, persist: bool) -> RepoResult<usize>;
    /// Adds every entity or none of them.
    fn add_range(&mut self, entities: &mut [E], persist: bool) -> RepoResult<usize>;
    fn update(&mut self, entity: &mut E, persist: bool) -> RepoResult<usize>;
    /// Marks every entity modified or none of them.
    fn update_range(&mut self, entities: &mut [E], persist: bool) -> RepoResult<usize>;
    fn delete(&mut self, entity: &E, persist: bool) -> RepoResult<usize>;
    /// Deletes by identity and version for callers holding no live entity.
    fn delete_by_id(
        &mut self,
        id: EntityId,
        version: Option<RowVersion>,
        persist: bool,
    ) -> RepoResult<usize>;
    /// Marks every entity deleted or none of them.
    fn delete_range(&mut self, entities: &[E], persist: bool) -> RepoResult<usize>;

    /// Commits all pending changes; returns rows affected.
    fn save_changes(&mut self) -> RepoResult<usize>;
    fn has_changes(&self) -> bool;
}

/// SQLite-backed generic repository owning one unit of work.
pub struct SqliteRepository<E: TableEntity> {
    uow: UnitOfWork<E>,
}

impl<E: TableEntity> SqliteRepository<E> {
    /// Takes exclusive ownership of `uow`; dropping the repository disposes it.
    pub fn new(uow: UnitOfWork<E>) -> Self {
        Self { uow }
    }

    pub fn unit_of_work(&self) -> &UnitOfWork<E> {
        &self.uow
    }

    /// Lifecycle state of `entity` in this repository's tracker.
    pub fn state_of(&self, entity: &E) -> EntityState {
        self.uow.tracker().state(entity.id())
    }

    /// Removes `entity` from tracking with no store effect.
    pub fn detach(&mut self, entity: &E) -> RepoResult<Option<E>> {
        Ok(self.uow.tracker_mut()?.detach(entity.id()))
    }

    /// Copies the tracked identity/version into `entity`; `false` if untracked.
    pub fn sync(&self, entity: &mut E) -> bool {
        self.uow.tracker().sync(entity)
    }

    /// Disposes the owned unit of work. Idempotent.
    pub fn dispose(&mut self) {
        self.uow.dispose();
    }

    /// Runs `SELECT ... <tail>` and attaches every row as `Unchanged`.
    ///
    /// `tail` holds the `WHERE`/`ORDER BY`/`LIMIT` clauses of entity-specific queries.
    pub fn query(&mut self, tail: &str, params: Vec<Value>) -> RepoResult<Vec<E>> {
        let loaded = {
            let conn = self.uow.connection()?;
            let mut stmt = conn.prepare(&format!("{} {tail};", select_sql::<E>()))?;
            let mut rows = stmt.query(params_from_iter(params))?;
            let mut loaded = Vec::new();
            while let Some(row) = rows.next()? {
                loaded.push(read_entity::<E>(row)?);
            }
            loaded
        };

        let tracker = self.uow.tracker_mut()?;
        Ok(loaded
            .into_iter()
            .filter_map(|entity| tracker.attach_loaded(entity))
            .collect())
    }

    // Rows pending deletion are excluded in SQL so pages stay full.
    fn page(&mut self, skip: u32, take: u32) -> RepoResult<Vec<E>> {
        let hidden = self.uow.tracker().deleted_ids();
        let filter = if hidden.is_empty() {
            String::new()
        } else {
            let placeholders = (1..=hidden.len())
                .map(|index| format!("?{index}"))
                .collect::<Vec<_>>()
                .join(", ");
            format!("WHERE id NOT IN ({placeholders}) ")
        };
        let limit_index = hidden.len() + 1;

        let mut params: Vec<Value> = hidden.into_iter().map(Value::Integer).collect();
        params.push(Value::Integer(i64::from(take)));
        params.push(Value::Integer(i64::from(skip)));
        self.query(
            &format!(
                "{filter}ORDER BY id ASC LIMIT ?{limit_index} OFFSET ?{}",
                limit_index + 1
            ),
            params,
        )
    }

    fn persist_if(&mut self, persist: bool) -> RepoResult<usize> {
        if persist {
            self.save_changes()
        } else {
            Ok(0)
        }
    }

    fn stale_delete(&self, id: EntityId, version: Option<RowVersion>) -> RepoError {
        let current_version = self
            .uow
            .tracker()
            .entry(id)
            .and_then(|entry| entry.entity.version().cloned());
        warn!(
            "event=delete_by_id module=repo status=error uow_id={} table={} id={id} error_code=concurrency_conflict",
            self.uow.id(),
            E::TABLE
        );
        RepoError::Concurrency(ConcurrencyConflict::new(
            E::TABLE,
            vec![ConflictEntry {
                id,
                operation: ConflictOperation::Delete,
                expected_version: version,
                current_version,
            }],
        ))
    }
}

impl<E: TableEntity> Repository<E> for SqliteRepository<E> {
    fn find(&mut self, id: EntityId) -> RepoResult<Option<E>> {
        if let Some(entry) = self.uow.tracker().entry(id) {
            if entry.state == EntityState::Deleted {
                return Ok(None);
            }
            return Ok(Some(entry.entity.clone()));
        }

        let mut found = self.query("WHERE id = ?1", vec![Value::Integer(id)])?;
        Ok(found.pop())
    }

    fn get_first(&mut self) -> RepoResult<Option<E>> {
        let mut first = self.page(0, 1)?;
        Ok(first.pop())
    }

    fn get_all(&mut self) -> RepoResult<Vec<E>> {
        self.query("ORDER BY id ASC", Vec::new())
    }

    fn get_range(&mut self, skip: u32, take: u32) -> RepoResult<Vec<E>> {
        self.page(skip, take)
    }

    fn count(&mut self) -> RepoResult<u64> {
        let count: i64 = self.uow.connection()?.query_row(
            &format!("SELECT COUNT(*) FROM {};", E::TABLE),
            [],
            |row| row.get(0),
        )?;
        u64::try_from(count).map_err(|_| RepoError::InvalidData(format!("negative count {count}")))
    }

    fn add(&mut self, entity: &mut E, persist: bool) -> RepoResult<usize> {
        entity.validate()?;
        self.uow.tracker_mut()?.track_added(entity)?;
        let affected = self.persist_if(persist)?;
        if persist {
            self.uow.tracker().sync(entity);
        }
        Ok(affected)
    }

    fn add_range(&mut self, entities: &mut [E], persist: bool) -> RepoResult<usize> {
        for entity in entities.iter() {
            entity.validate()?;
        }
        self.uow.tracker_mut()?.track_added_all(entities)?;
        let affected = self.persist_if(persist)?;
        if persist {
            for entity in entities.iter_mut() {
                self.uow.tracker().sync(entity);
            }
        }
        Ok(affected)
    }

    fn update(&mut self, entity: &mut E, persist: bool) -> RepoResult<usize> {
        entity.validate()?;
        self.uow.tracker_mut()?.mark_modified(entity)?;
        let affected = self.persist_if(persist)?;
        if persist {
            self.uow.tracker().sync(entity);
        }
        Ok(affected)
    }

    fn update_range(&mut self, entities: &mut [E], persist: bool) -> RepoResult<usize> {
        for entity in entities.iter() {
            entity.validate()?;
        }
        self.uow.tracker_mut()?.mark_modified_all(entities)?;
        let affected = self.persist_if(persist)?;
        if persist {
            for entity in entities.iter_mut() {
                self.uow.tracker().sync(entity);
            }
        }
        Ok(affected)
    }

    fn delete(&mut self, entity: &E, persist: bool) -> RepoResult<usize> {
        self.uow.tracker_mut()?.mark_deleted(entity)?;
        self.persist_if(persist)
    }

    fn delete_by_id(
        &mut self,
        id: EntityId,
        version: Option<RowVersion>,
        persist: bool,
    ) -> RepoResult<usize> {
        // An absent token can never match a written row.
        let Some(supplied) = version else {
            return Err(self.stale_delete(id, None));
        };

        let tracked = self
            .uow
            .tracker()
            .entry(id)
            .map(|entry| entry.entity.clone());
        let target = match tracked {
            Some(entity) if entity.version() == Some(&supplied) => entity,
            Some(_) => return Err(self.stale_delete(id, Some(supplied))),
            None => {
                let mut placeholder = E::default();
                placeholder.set_id(id);
                placeholder.set_version(Some(supplied));
                debug!(
                    "event=delete_by_id module=repo status=ok uow_id={} table={} id={id} tracked=false",
                    self.uow.id(),
                    E::TABLE
                );
                placeholder
            }
        };

        self.uow.tracker_mut()?.mark_deleted(&target)?;
        self.persist_if(persist)
    }

    fn delete_range(&mut self, entities: &[E], persist: bool) -> RepoResult<usize> {
        self.uow.tracker_mut()?.mark_deleted_all(entities)?;
        self.persist_if(persist)
    }

    fn save_changes(&mut self) -> RepoResult<usize> {
        self.uow.save_changes()
    }

    fn has_changes(&self) -> bool {
        self.uow.tracker().has_changes()
    }
}
