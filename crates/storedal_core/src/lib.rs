//! Change-tracked data access over SQLite.
//!
//! Generic repositories record Add/Update/Delete intents in a per-unit-of-work
//! change tracker and flush them as one atomic, retried commit guarded by
//! per-row version tokens.

pub mod context;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;

pub use context::change_tracker::{ChangeTracker, TrackedEntry};
pub use context::execution_strategy::{ExecutionStrategy, TransientPolicy};
pub use context::UnitOfWork;
pub use logging::{default_log_level, init_logging, logging_status, LogTarget};
pub use model::category::Category;
pub use model::entity::{
    Entity, EntityId, EntityState, EntityValidationError, RowVersion, TableEntity, UNSAVED_ID,
};
pub use repo::category_repo::CategoryRepository;
pub use repo::error::{
    ConcurrencyConflict, ConflictEntry, ConflictOperation, RepoError, RepoResult,
};
pub use repo::repository::{Repository, SqliteRepository};

/// Minimal health-check API.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
