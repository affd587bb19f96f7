//! # Executors Module
//!
//! Bundled executor implementations:
//! - VfsExecutor: directory-backed devices and mounts, for development and tests

pub mod vfs;

pub use vfs::VfsExecutor;
