//! Database models.
//!
//! These models map directly to the database schema. Conversion into the
//! domain tree lives next to the repository that assembles it.

pub mod push;

pub use push::*;
