//! Dependency references and their resolution.
//!
//! This module handles resolving remote dependencies (registry packages) into
//! source images, pinning them in lock files and caching them locally.
//!
//! # Modules
//!
//! - [`lock`] - Lock file management for reproducible builds
//! - [`cache`] - Filesystem cache of resolved remote images
//! - [`registry`] - The registry client capability and its HTTP implementation
//! - [`resolve`] - Version selection, fetching and includes merging

pub mod cache;
pub mod lock;
pub mod registry;
pub mod resolve;
mod types;

pub use types::*;
