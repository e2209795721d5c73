//! media-vault
//!
//! Core content pipeline for a Discord media bot. The bot's interaction
//! layer is an external collaborator; this crate owns everything with
//! real consistency concerns:
//!
//! - a SQLite **record store** of content-hashed file records with
//!   per-guild usage counters ([`storage`])
//! - a **synchronizer** reconciling category directories with the store,
//!   deduplicating by SHA-256 ([`sync`])
//! - a **compression engine** that searches encoding parameters to fit a
//!   hard size budget ([`compress`])
//! - a **rate-limited fetch queue** for the remote content API ([`api`])
//!
//! Components receive their configuration explicitly at construction;
//! see [`config`].

pub mod api;
pub mod compress;
pub mod config;
pub mod error;
pub mod models;
pub mod storage;
pub mod sync;
pub mod utils;

pub use config::{ApiConfig, AppConfig};
pub use error::{AppError, Result};
pub use models::record::{FileRecord, GuildUsage};
pub use storage::FileDatabase;
pub use sync::{FileManager, FileSynchronizer, SyncReport};
