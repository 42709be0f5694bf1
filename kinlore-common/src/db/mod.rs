//! Database initialization and queries

pub mod init;
pub mod role_permissions;
pub mod settings;

pub use init::*;
