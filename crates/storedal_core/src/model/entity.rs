//! Entity capability shared by every tracked record.
//!
//! # Responsibility
//! - Define identity and concurrency-token accessors used by the change tracker.
//! - Define the table mapping used by the generic SQLite repository.
//!
//! # Invariants
//! - `id() < 0` means the record has never been inserted.
//! - `version()` is `None` iff the record has never been written successfully.

use rusqlite::types::Value;
use rusqlite::Row;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Integer identity of a persisted record.
pub type EntityId = i64;

/// Identity carried by freshly constructed entities.
pub const UNSAVED_ID: EntityId = -1;

/// Opaque row version generated by the store on every successful write.
///
/// Compared byte-wise; never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowVersion(Vec<u8>);

impl RowVersion {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Parses the lowercase/uppercase hex form produced by `Display`.
    pub fn from_hex(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() || value.len() % 2 != 0 {
            return None;
        }
        let bytes = (0..value.len())
            .step_by(2)
            .map(|index| u8::from_str_radix(value.get(index..index + 2)?, 16).ok())
            .collect::<Option<Vec<u8>>>()?;
        Some(Self(bytes))
    }
}

impl Display for RowVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Lifecycle state of an entity relative to one change tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    /// Not tracked (never attached, explicitly detached, or evicted after delete).
    Detached,
    /// Pending insert.
    Added,
    /// Tracked and in sync with the last committed store state.
    Unchanged,
    /// Pending conditional update.
    Modified,
    /// Pending conditional delete.
    Deleted,
}

impl EntityState {
    /// Returns whether a commit has work to do for this state.
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Detached => "detached",
            Self::Added => "added",
            Self::Unchanged => "unchanged",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

impl Display for EntityState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation failure raised before an entity reaches the change tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityValidationError {
    BlankField(&'static str),
    FieldTooLong {
        field: &'static str,
        max_chars: usize,
        actual_chars: usize,
    },
}

impl Display for EntityValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankField(field) => write!(f, "`{field}` must not be blank"),
            Self::FieldTooLong {
                field,
                max_chars,
                actual_chars,
            } => write!(
                f,
                "`{field}` is {actual_chars} characters long; at most {max_chars} allowed"
            ),
        }
    }
}

impl Error for EntityValidationError {}

/// Identity and concurrency token capability.
///
/// `Default` must produce an unsaved, unversioned record; delete-by-identity
/// builds its placeholder from it.
pub trait Entity: Clone + Default {
    fn id(&self) -> EntityId;
    fn set_id(&mut self, id: EntityId);
    fn version(&self) -> Option<&RowVersion>;
    fn set_version(&mut self, version: Option<RowVersion>);

    /// Checks field invariants before Add/Update.
    fn validate(&self) -> Result<(), EntityValidationError> {
        Ok(())
    }

    /// Returns whether this record has ever been inserted.
    fn is_persisted(&self) -> bool {
        self.id() >= 0
    }
}

/// SQLite table mapping for an entity.
///
/// Every mapped table has an `id INTEGER PRIMARY KEY` column and a
/// store-maintained `row_version BLOB` column in addition to `COLUMNS`.
pub trait TableEntity: Entity {
    /// Table name.
    const TABLE: &'static str;
    /// Data columns, excluding `id` and `row_version`, in `values()` order.
    const COLUMNS: &'static [&'static str];

    /// Data column values bound in `COLUMNS` order.
    fn values(&self) -> Vec<Value>;

    /// Reads data columns from a row; identity and version are filled in by the caller.
    fn read_columns(row: &Row<'_>) -> rusqlite::Result<Self>;
}

#[cfg(test)]
mod tests {
    use super::{EntityState, RowVersion};

    #[test]
    fn row_version_hex_roundtrip() {
        let version = RowVersion::from_bytes(vec![0x00, 0xab, 0x10, 0xff]);
        assert_eq!(version.to_string(), "00ab10ff");
        assert_eq!(RowVersion::from_hex("00AB10FF"), Some(version));
    }

    #[test]
    fn row_version_from_hex_rejects_malformed_input() {
        assert_eq!(RowVersion::from_hex(""), None);
        assert_eq!(RowVersion::from_hex("abc"), None);
        assert_eq!(RowVersion::from_hex("zz"), None);
    }

    #[test]
    fn only_write_states_are_pending() {
        assert!(EntityState::Added.is_pending());
        assert!(EntityState::Modified.is_pending());
        assert!(EntityState::Deleted.is_pending());
        assert!(!EntityState::Unchanged.is_pending());
        assert!(!EntityState::Detached.is_pending());
    }
}
