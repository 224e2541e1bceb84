pub mod auth;
pub mod deployments;
pub mod env_vars;
pub mod health;
pub mod projects;
pub mod webhooks;
