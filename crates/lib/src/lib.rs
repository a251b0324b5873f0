//! protoforge-lib: schema bundle build engine
//!
//! This crate turns a repository of schema bundles into verified source images
//! and drives code generators against them:
//! - `image`: source images, descriptor ordering and conflict-free merging
//! - `inputs`: dependency references, lock files, the remote image cache and resolution
//! - `repo`: repository/bundle configuration, plugin inheritance and the bundle DAG
//! - `plugin`: generator request building, concurrent dispatch and output collection
//! - `runner`: container, local-process and registry-auth execution backends
//! - `generate`: the session that ties the pieces together for generate/publish builds

pub mod consts;
pub mod generate;
pub mod image;
pub mod inputs;
pub mod platform;
pub mod plugin;
pub mod repo;
pub mod runner;
pub mod util;
