//! Default storage locations under the user's cache directory.

use std::path::PathBuf;

/// App cache root: `~/Library/Caches/ferry/` (macOS) or `~/.cache/ferry/` (Linux).
pub fn app_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("ferry"))
}

/// SQLite database file: `<app_cache_dir>/ferry.db`.
pub fn db_path() -> Option<PathBuf> {
    app_cache_dir().map(|d| d.join("ferry.db"))
}

/// Download artifacts waiting for redemption: `<app_cache_dir>/staging/`.
pub fn staging_dir() -> Option<PathBuf> {
    app_cache_dir().map(|d| d.join("staging"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_path_lives_in_app_dir() {
        let (Some(root), Some(db)) = (app_cache_dir(), db_path()) else {
            // No home directory in this environment.
            return;
        };
        assert!(db.starts_with(&root));
        assert!(db.to_string_lossy().ends_with("ferry.db"));
    }

    #[test]
    fn test_staging_dir_lives_in_app_dir() {
        let (Some(root), Some(staging)) = (app_cache_dir(), staging_dir()) else {
            return;
        };
        assert!(staging.starts_with(&root));
        assert!(staging.ends_with("staging"));
    }
}
