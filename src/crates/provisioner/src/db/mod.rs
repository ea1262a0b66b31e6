//! Database module backing the connection registry
//!
//! Provides connectivity, the connection record model, its repository and
//! error handling.

pub mod connection;
pub mod error;
pub mod models;
pub mod repositories;

pub use connection::{DatabaseConnection, DatabasePool};
pub use error::DatabaseError;
