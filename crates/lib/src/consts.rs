/// Program name shown in help output.
pub const APP_NAME: &str = "koti";

/// Default location of the per-manager JSON stores.
pub const DEFAULT_CACHE_DIR: &str = "/var/cache/koti";

/// Environment variable overriding [`DEFAULT_CACHE_DIR`].
pub const CACHE_DIR_ENV: &str = "KOTI_CACHE_DIR";

/// Marker hashed in place of the state of a hook trigger that is not declared.
pub const ABSENT_TRIGGER_MARKER: &str = "absent";
