pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod persistence;
pub mod rate_limit;
pub mod state;
pub mod sweeper;

pub use handlers::router;
