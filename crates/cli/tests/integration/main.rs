//! CLI integration tests.

mod common;
mod generate_tests;
mod repo_tests;
