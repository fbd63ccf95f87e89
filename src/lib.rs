//! Nubbybot: a community archive assistant engine.
//!
//! Archives group-chat conversation into SQLite, answers natural-language
//! questions about the archive through a hosted completion service, and
//! tracks short-lived follow-up conversations without an explicit trigger
//! on every message. The chat-platform gateway and the admin dashboard are
//! consumers of this library, not part of it.

pub mod archive;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod query;
pub mod settings;
pub mod trace;

pub use error::{Error, Result};
