//! HTTP route handlers.

pub mod observability;
pub mod subscriptions;
pub mod workspaces;
