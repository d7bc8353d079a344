//! Tree-hole mirror library.
//!
//! A service that incrementally mirrors a remote "tree hole" forum into a
//! local SQLite store and pushes locally-authored posts and replies back to
//! the remote system, reconciling local rows with remote-assigned IDs.

pub mod api;
pub mod config;
pub mod db;
pub mod scheduler;
pub mod sync;
