//! Utility helpers — path resolution and string manipulation.

use std::path::PathBuf;

/// Get the Aeon data directory (e.g. `~/.aeon/`).
pub fn get_data_path() -> PathBuf {
    let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".aeon")
}

/// Get the default database path (e.g. `~/.aeon/aeon.db`).
pub fn get_default_db_path() -> PathBuf {
    get_data_path().join("aeon.db")
}

/// Get the default workspace path (e.g. `~/.aeon/workspace/`).
pub fn get_default_workspace_path() -> PathBuf {
    get_data_path().join("workspace")
}

/// Expand `~` to the home directory in a path string.
pub fn expand_home(path: &str) -> PathBuf {
    if path.starts_with("~/") || path == "~" {
        let home = dirs_next::home_dir().unwrap_or_else(|| PathBuf::from("."));
        if path == "~" {
            home
        } else {
            home.join(&path[2..])
        }
    } else {
        PathBuf::from(path)
    }
}

/// Truncate a string to `max_chars` characters. Unicode-safe.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_short() {
        assert_eq!(truncate_chars("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_chars_exact() {
        assert_eq!(truncate_chars("hello", 5), "hello");
    }

    #[test]
    fn test_truncate_chars_long() {
        assert_eq!(truncate_chars("hello world", 5), "hello");
    }

    #[test]
    fn test_truncate_chars_unicode() {
        // Must not split a multi-byte character.
        assert_eq!(truncate_chars("héllo wörld", 6), "héllo ");
    }

    #[test]
    fn test_expand_home_tilde() {
        let expanded = expand_home("~/notes");
        assert!(expanded.to_string_lossy().ends_with("notes"));
        assert!(!expanded.to_string_lossy().contains('~'));
    }

    #[test]
    fn test_expand_home_absolute() {
        assert_eq!(expand_home("/tmp/x"), PathBuf::from("/tmp/x"));
    }
}
