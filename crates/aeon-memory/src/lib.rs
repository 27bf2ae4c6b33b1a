//! SQLite-backed persistence for Aeon: long-term memories with a
//! full-text index, and conversation history bucketed by session.

pub mod store;

pub use store::{MemoryCategory, MemoryEntry, MemoryStore};
