use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "ptm-stats";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Bounded retry policy for contended row writes (SQLITE_BUSY).
pub const MAX_WRITE_ATTEMPTS: u32 = 3;
pub const RETRY_BACKOFF_MS: u64 = 50;

/// Get the application data directory (~/ptm-stats/ on all platforms)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("ptm-stats")
}

/// Default on-disk database location
pub fn default_database_path() -> PathBuf {
    app_data_dir().join("ptm.db")
}

/// Default tracing filter when RUST_LOG is unset
pub fn default_log_filter() -> &'static str {
    "info,ptm_stats=debug"
}
