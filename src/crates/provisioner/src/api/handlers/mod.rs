//! API request handlers

pub mod databases;
pub mod health;

pub use databases::create_database;
pub use health::{health, health_detailed};
