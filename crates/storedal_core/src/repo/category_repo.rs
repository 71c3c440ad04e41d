//! Category repository.
//!
//! Composes the generic repository and adds category-specific queries.

use crate::context::execution_strategy::ExecutionStrategy;
use crate::context::UnitOfWork;
use crate::model::category::Category;
use crate::repo::error::RepoResult;
use crate::repo::repository::SqliteRepository;
use rusqlite::types::Value;
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};

/// Repository for `Category` rows.
pub struct CategoryRepository {
    inner: SqliteRepository<Category>,
}

impl CategoryRepository {
    pub fn new(uow: UnitOfWork<Category>) -> Self {
        Self {
            inner: SqliteRepository::new(uow),
        }
    }

    /// Wraps `conn` in a fresh unit of work using `strategy`.
    pub fn try_new(conn: Connection, strategy: ExecutionStrategy) -> RepoResult<Self> {
        Ok(Self::new(UnitOfWork::new(conn, strategy)?))
    }

    /// All categories ordered by name, ties broken by identity.
    pub fn get_all_by_name(&mut self) -> RepoResult<Vec<Category>> {
        self.inner.query("ORDER BY name ASC, id ASC", Vec::new())
    }

    /// Categories whose name matches exactly.
    pub fn find_by_name(&mut self, name: &str) -> RepoResult<Vec<Category>> {
        self.inner.query(
            "WHERE name = ?1 ORDER BY id ASC",
            vec![Value::Text(name.to_string())],
        )
    }
}

impl Deref for CategoryRepository {
    type Target = SqliteRepository<Category>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl DerefMut for CategoryRepository {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
