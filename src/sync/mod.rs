//! File synchronization
//!
//! - [`synchronizer`]: reconciles category directories with the store
//! - [`manager`]: facade operations the interaction layer calls

pub mod manager;
pub mod synchronizer;

pub use manager::FileManager;
pub use synchronizer::{FileSynchronizer, SyncReport};
