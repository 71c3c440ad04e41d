//! Entity capability and concrete records.
//!
//! # Responsibility
//! - Define the identity/version contract every tracked record satisfies.
//! - Host concrete records mapped to migrated tables.
//!
//! # Invariants
//! - Identity is an integer; negative values are placeholders for unsaved rows.
//! - Version tokens are opaque and generated by the store.

pub mod category;
pub mod entity;
