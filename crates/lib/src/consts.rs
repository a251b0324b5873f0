pub const APP_NAME: &str = "protoforge";

/// Repository configuration file at the repository root.
pub const REPO_CONFIG_FILENAME: &str = "protoforge.yaml";

/// Optional per-bundle configuration file inside a bundle directory.
pub const BUNDLE_CONFIG_FILENAME: &str = "bundle.yaml";

/// Floating reference used when a remote dependency has neither a version nor a lock pin.
pub const DEFAULT_REFERENCE: &str = "main";

/// Environment variable overriding the remote image cache location.
pub const CACHE_DIR_ENV: &str = "PROTOFORGE_CACHE_DIR";

/// Environment variable read by token-based registry auth when no other is configured.
pub const DEFAULT_TOKEN_ENV: &str = "REGISTRY_TOKEN";

/// Length of the hash suffix used in cache entry file names.
pub const CACHE_HASH_LEN: usize = 16;
