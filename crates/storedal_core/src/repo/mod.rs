//! Repository layer abstractions and SQLite implementations.
//!
//! # Responsibility
//! - Define the generic CRUD contract and its change-tracked SQLite implementation.
//! - Host entity-specific repositories that compose the generic one.
//!
//! # Invariants
//! - Repository writes enforce `Entity::validate()` before tracking.
//! - Repository APIs return semantic errors (`NotTracked`, `Concurrency`,
//!   `RetryLimitExceeded`) in addition to DB transport errors.

pub mod category_repo;
pub mod error;
pub mod repository;
