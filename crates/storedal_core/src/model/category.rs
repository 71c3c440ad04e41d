//! Category record.
//!
//! # Responsibility
//! - Reference entity mapped to the `categories` table.
//!
//! # Invariants
//! - `name` is non-blank and at most `CATEGORY_NAME_MAX_CHARS` characters.

use crate::model::entity::{
    Entity, EntityId, EntityValidationError, RowVersion, TableEntity, UNSAVED_ID,
};
use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

pub const CATEGORY_NAME_MAX_CHARS: usize = 50;

/// Product category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: EntityId,
    pub name: String,
    /// Serialized as `row_version` to match the column name.
    #[serde(rename = "row_version")]
    pub version: Option<RowVersion>,
}

impl Category {
    /// Creates an unsaved category.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: UNSAVED_ID,
            name: name.into(),
            version: None,
        }
    }
}

impl Default for Category {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl Entity for Category {
    fn id(&self) -> EntityId {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn version(&self) -> Option<&RowVersion> {
        self.version.as_ref()
    }

    fn set_version(&mut self, version: Option<RowVersion>) {
        self.version = version;
    }

    fn validate(&self) -> Result<(), EntityValidationError> {
        if self.name.trim().is_empty() {
            return Err(EntityValidationError::BlankField("name"));
        }
        let actual_chars = self.name.chars().count();
        if actual_chars > CATEGORY_NAME_MAX_CHARS {
            return Err(EntityValidationError::FieldTooLong {
                field: "name",
                max_chars: CATEGORY_NAME_MAX_CHARS,
                actual_chars,
            });
        }
        Ok(())
    }
}

impl TableEntity for Category {
    const TABLE: &'static str = "categories";
    const COLUMNS: &'static [&'static str] = &["name"];

    fn values(&self) -> Vec<Value> {
        vec![Value::Text(self.name.clone())]
    }

    fn read_columns(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self::new(row.get::<_, String>("name")?))
    }
}

#[cfg(test)]
mod tests {
    use super::{Category, CATEGORY_NAME_MAX_CHARS};
    use crate::model::entity::{Entity, EntityValidationError};

    #[test]
    fn new_category_is_unsaved_and_unversioned() {
        let category = Category::new("Foo");
        assert!(category.id < 0);
        assert!(!category.is_persisted());
        assert!(category.version.is_none());
    }

    #[test]
    fn validate_rejects_blank_and_long_names() {
        assert_eq!(
            Category::new("   ").validate(),
            Err(EntityValidationError::BlankField("name"))
        );
        let long = "x".repeat(CATEGORY_NAME_MAX_CHARS + 1);
        assert!(matches!(
            Category::new(long).validate(),
            Err(EntityValidationError::FieldTooLong { actual_chars, .. })
                if actual_chars == CATEGORY_NAME_MAX_CHARS + 1
        ));
        assert!(Category::new("Bar").validate().is_ok());
    }
}
