//! HTTP API handlers for kinlore-fn

pub mod auth;
pub mod health;
pub mod image_proxy;
pub mod invitations;
pub mod permissions;
pub mod rewrite;
pub mod settings;
pub mod transcribe;
pub mod upload;

pub use auth::auth_middleware;
pub use health::{get_build_info, health_routes};
pub use image_proxy::image_proxy_routes;
pub use invitations::invitation_routes;
pub use permissions::permission_routes;
pub use rewrite::rewrite_routes;
pub use settings::settings_routes;
pub use transcribe::transcribe_routes;
