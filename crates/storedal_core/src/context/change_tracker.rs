//! Per-unit-of-work registry of tracked entities.
//!
//! # Responsibility
//! - Own one snapshot per tracked entity together with its lifecycle state.
//! - Enforce the entity state machine for Add/Update/Delete/Detach.
//! - Fold committed results (generated identities, new versions) back in.
//!
//! # Invariants
//! - Entries are keyed by the entity's current identity (placeholder or stored).
//! - Placeholder identities are negative and unique within one tracker.
//! - State only leaves `Added`/`Modified`/`Deleted` through `accept_changes` or `detach`.
//! - Batch transitions (`*_all`) apply to every entity or leave the tracker as it was.

use crate::model::entity::{Entity, EntityId, EntityState, RowVersion};
use crate::repo::error::{RepoError, RepoResult};
use std::collections::{BTreeMap, HashMap, HashSet};

// Far from UNSAVED_ID so placeholders never collide with freshly constructed entities.
const PLACEHOLDER_SEED: EntityId = i64::MIN + 1_000;

/// One tracked record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedEntry<E> {
    pub entity: E,
    pub state: EntityState,
}

/// Snapshot of one pending write handed to the commit.
#[derive(Debug, Clone)]
pub struct PendingChange<E> {
    pub key: EntityId,
    pub state: EntityState,
    pub entity: E,
}

/// Store outcome of one applied write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedChange {
    Inserted {
        placeholder: EntityId,
        id: EntityId,
        version: RowVersion,
    },
    Updated {
        id: EntityId,
        version: RowVersion,
    },
    Deleted {
        id: EntityId,
    },
}

/// Registry mapping tracked entities to lifecycle states.
#[derive(Debug, Clone)]
pub struct ChangeTracker<E> {
    entries: BTreeMap<EntityId, TrackedEntry<E>>,
    /// Persisted identities this tracker has attached at some point and not seen deleted.
    known: HashSet<EntityId>,
    /// Placeholder -> stored identity, for callers still holding placeholder copies.
    resolved: HashMap<EntityId, EntityId>,
    next_placeholder: EntityId,
}

impl<E> Default for ChangeTracker<E> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            known: HashSet::new(),
            resolved: HashMap::new(),
            next_placeholder: PLACEHOLDER_SEED,
        }
    }
}

impl<E: Entity> ChangeTracker<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps a placeholder committed earlier to its stored identity.
    pub fn resolve(&self, id: EntityId) -> EntityId {
        self.resolved.get(&id).copied().unwrap_or(id)
    }

    pub fn entry(&self, id: EntityId) -> Option<&TrackedEntry<E>> {
        self.entries.get(&self.resolve(id))
    }

    /// Lifecycle state for an identity; `Detached` when not tracked.
    pub fn state(&self, id: EntityId) -> EntityState {
        self.entry(id).map_or(EntityState::Detached, |entry| entry.state)
    }

    pub fn has_changes(&self) -> bool {
        self.entries.values().any(|entry| entry.state.is_pending())
    }

    /// Stored identities pending deletion, in identity order.
    pub fn deleted_ids(&self) -> Vec<EntityId> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.state == EntityState::Deleted)
            .map(|(id, _)| *id)
            .collect()
    }

    /// `track_added` for every entity, or for none of them.
    ///
    /// On failure the tracker and the callers' identities/versions are restored.
    pub fn track_added_all(&mut self, entities: &mut [E]) -> RepoResult<()> {
        let originals: Vec<(EntityId, Option<RowVersion>)> = entities
            .iter()
            .map(|entity| (entity.id(), entity.version().cloned()))
            .collect();
        let result = self.all_or_nothing(|tracker| {
            entities
                .iter_mut()
                .try_for_each(|entity| tracker.track_added(entity).map(|_| ()))
        });
        if result.is_err() {
            for (entity, (id, version)) in entities.iter_mut().zip(originals) {
                entity.set_id(id);
                entity.set_version(version);
            }
        }
        result
    }

    /// `mark_modified` for every entity, or for none of them.
    pub fn mark_modified_all(&mut self, entities: &[E]) -> RepoResult<()> {
        self.all_or_nothing(|tracker| {
            entities
                .iter()
                .try_for_each(|entity| tracker.mark_modified(entity))
        })
    }

    /// `mark_deleted` for every entity, or for none of them.
    pub fn mark_deleted_all(&mut self, entities: &[E]) -> RepoResult<()> {
        self.all_or_nothing(|tracker| {
            entities
                .iter()
                .try_for_each(|entity| tracker.mark_deleted(entity))
        })
    }

    fn all_or_nothing(
        &mut self,
        apply: impl FnOnce(&mut Self) -> RepoResult<()>,
    ) -> RepoResult<()> {
        let checkpoint = self.clone();
        let result = apply(self);
        if result.is_err() {
            *self = checkpoint;
        }
        result
    }

    /// `Detached -> Added`. Assigns a placeholder identity and clears the version.
    pub fn track_added(&mut self, entity: &mut E) -> RepoResult<EntityId> {
        if self.entries.contains_key(&self.resolve(entity.id())) {
            return Err(RepoError::AlreadyTracked(entity.id()));
        }

        let placeholder = self.next_placeholder;
        self.next_placeholder += 1;
        entity.set_id(placeholder);
        entity.set_version(None);
        self.entries.insert(
            placeholder,
            TrackedEntry {
                entity: entity.clone(),
                state: EntityState::Added,
            },
        );
        Ok(placeholder)
    }

    /// `Detached/Unchanged/Modified -> Modified`, replacing the pending snapshot.
    ///
    /// Detached entities are accepted only when this tracker attached them before.
    pub fn mark_modified(&mut self, entity: &E) -> RepoResult<()> {
        let id = self.resolve(entity.id());
        let mut snapshot = entity.clone();
        snapshot.set_id(id);

        match self.entries.get_mut(&id) {
            Some(entry) => match entry.state {
                EntityState::Unchanged | EntityState::Modified => {
                    entry.entity = snapshot;
                    entry.state = EntityState::Modified;
                    Ok(())
                }
                from => Err(RepoError::InvalidTransition {
                    id,
                    from,
                    to: EntityState::Modified,
                }),
            },
            None if self.known.contains(&id) => {
                self.entries.insert(
                    id,
                    TrackedEntry {
                        entity: snapshot,
                        state: EntityState::Modified,
                    },
                );
                Ok(())
            }
            None => Err(RepoError::NotTracked(entity.id())),
        }
    }

    /// `tracked -> Deleted`. Pending inserts are discarded instead.
    ///
    /// Untracked persisted entities are attached directly as `Deleted`.
    pub fn mark_deleted(&mut self, entity: &E) -> RepoResult<()> {
        let id = self.resolve(entity.id());
        let mut snapshot = entity.clone();
        snapshot.set_id(id);

        match self.entries.get(&id).map(|entry| entry.state) {
            Some(EntityState::Added) => {
                self.entries.remove(&id);
            }
            Some(EntityState::Deleted) => {}
            Some(_) => {
                self.entries.insert(
                    id,
                    TrackedEntry {
                        entity: snapshot,
                        state: EntityState::Deleted,
                    },
                );
            }
            None if id >= 0 => {
                self.known.insert(id);
                self.entries.insert(
                    id,
                    TrackedEntry {
                        entity: snapshot,
                        state: EntityState::Deleted,
                    },
                );
            }
            None => return Err(RepoError::NotTracked(entity.id())),
        }
        Ok(())
    }

    /// Attaches a row materialized from the store as `Unchanged`.
    ///
    /// Returns the tracked copy when the identity is already tracked, or
    /// `None` when that copy is pending deletion.
    pub fn attach_loaded(&mut self, entity: E) -> Option<E> {
        let id = entity.id();
        self.known.insert(id);
        let entry = self.entries.entry(id).or_insert(TrackedEntry {
            entity,
            state: EntityState::Unchanged,
        });
        if entry.state == EntityState::Deleted {
            return None;
        }
        Some(entry.entity.clone())
    }

    /// Any state -> `Detached`, with no store effect.
    pub fn detach(&mut self, id: EntityId) -> Option<E> {
        let id = self.resolve(id);
        self.entries.remove(&id).map(|entry| entry.entity)
    }

    /// Snapshots of every pending write, in identity order.
    pub fn pending_changes(&self) -> Vec<PendingChange<E>> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.state.is_pending())
            .map(|(key, entry)| PendingChange {
                key: *key,
                state: entry.state,
                entity: entry.entity.clone(),
            })
            .collect()
    }

    /// Applies a committed batch: refreshes identities/versions and moves
    /// touched entries to `Unchanged`, evicting deleted ones.
    pub fn accept_changes(&mut self, applied: &[AppliedChange]) {
        for change in applied {
            match change {
                AppliedChange::Inserted {
                    placeholder,
                    id,
                    version,
                } => {
                    if let Some(mut entry) = self.entries.remove(placeholder) {
                        entry.entity.set_id(*id);
                        entry.entity.set_version(Some(version.clone()));
                        entry.state = EntityState::Unchanged;
                        self.entries.insert(*id, entry);
                        self.known.insert(*id);
                        self.resolved.insert(*placeholder, *id);
                    }
                }
                AppliedChange::Updated { id, version } => {
                    if let Some(entry) = self.entries.get_mut(id) {
                        entry.entity.set_version(Some(version.clone()));
                        entry.state = EntityState::Unchanged;
                    }
                }
                AppliedChange::Deleted { id } => {
                    self.entries.remove(id);
                    self.known.remove(id);
                    self.resolved.retain(|_, resolved| *resolved != *id);
                }
            }
        }
    }

    /// Copies the tracked identity and version into a caller-held copy.
    ///
    /// Returns `false` when the entity is no longer tracked.
    pub fn sync(&self, entity: &mut E) -> bool {
        let id = self.resolve(entity.id());
        match self.entries.get(&id) {
            Some(entry) => {
                entity.set_id(id);
                entity.set_version(entry.entity.version().cloned());
                true
            }
            None => false,
        }
    }
}
