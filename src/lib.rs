//! Storage layer for a self-hosted bookmark manager.
//!
//! [`storage::Database`] owns the SQLite schema and every operation on it;
//! [`config::Config`] reads the optional TOML configuration file.
pub mod config;
pub mod storage;
pub mod util;
