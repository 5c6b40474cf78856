use std::path::PathBuf;

const APP_DIR: &str = ".dialectus";
const DATABASE_FILE: &str = "debates.db";

pub fn home_dir() -> Option<PathBuf> {
    for key in ["HOME", "USERPROFILE"] {
        if let Ok(home) = std::env::var(key) {
            if !home.is_empty() {
                return Some(PathBuf::from(home));
            }
        }
    }

    None
}

/// `$HOME/.dialectus/debates.db`, or a relative path when no home is known.
pub fn default_database_path() -> PathBuf {
    home_dir()
        .map(|home| home.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(APP_DIR))
        .join(DATABASE_FILE)
}
