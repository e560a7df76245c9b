pub mod api;
pub mod config;
pub mod error;
pub mod events;
pub mod idempotency;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod saga;
pub mod services;
