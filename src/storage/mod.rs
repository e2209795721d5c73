//! Record store
//!
//! SQLite-backed persistence for file records. Files are identified by
//! their SHA-256 content hash; the database tracks where each artifact
//! lives on disk, its compressed counterpart if one exists, and per-guild
//! usage counters.

pub mod database;

pub use database::FileDatabase;
