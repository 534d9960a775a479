//! live-relay library crate.
//!
//! Routes live-stream events to the chat destinations subscribers configured
//! for them, through pluggable handlers, with per-platform rate-limited
//! delivery.

pub mod cli;
pub mod config;
pub mod database;
pub mod delivery;
pub mod domain;
pub mod error;
pub mod extension;
pub mod handler;
pub mod logging;
pub mod panic_hook;
pub mod router;
pub mod services;
pub mod settings;
pub mod source;
pub mod utils;

pub use error::{Error, Result};
