//! Repository layer for database access.

pub mod subscriber;

pub use subscriber::*;
