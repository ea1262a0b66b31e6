//! Repository implementations for database access

pub mod connection_repo;

pub use connection_repo::ConnectionRepository;
