//! # Kinlore Common Library
//!
//! Shared code for the Kinlore services and clients:
//! - Error and result types
//! - Configuration loading (root folder, TOML, logging)
//! - Database initialization and settings access
//! - Domain records (roles, permissions, invitations)
//! - Request deduplication / TTL cache and debounce
//! - Role/permission table with cached overrides
//! - Retry with exponential backoff
//! - User-facing error categorization

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod permissions;
pub mod request_cache;
pub mod retry;
pub mod time;
pub mod user_error;

pub use error::{Error, Result};
pub use models::{Permission, Role};
