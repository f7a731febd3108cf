//! SQLite manifest for shadow collections.
//!
//! The manifest records, per collection and per library item, what the engine
//! believes is currently on disk: the relative path it materialized, the
//! source and album art timestamps it last synced from, and the format it
//! stored. Every entry is written only after the matching filesystem change
//! has been committed, and deleted only after the file is gone.
//!
//! # Durability
//! Each upsert or delete is a single statement on a WAL database with
//! `synchronous = FULL`, so after a crash a key holds either its old or its
//! new value.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::CollectionItem;
pub use crate::repo::Manifest;

/// Identity of a library item, as assigned by the host library.
pub type ItemId = u64;
