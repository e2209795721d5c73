//! Data models
//!
//! - [`record`]: the file record stored in the database
//! - [`api`]: validated schema for the remote content API

pub mod api;
pub mod record;

pub use api::{DateRange, FileType, Post, PostsResponse, Rating, SearchQuery, SortOrder};
pub use record::{FileRecord, GuildUsage};
