//! Database models
//!
//! Timestamp fields are stored as RFC 3339 strings (TEXT in SQLite).

pub mod connection_record;

pub use connection_record::ConnectionRecord;
