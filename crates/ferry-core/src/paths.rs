use crate::error::{FerryError, Result};
use regex::Regex;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// File constants
// ---------------------------------------------------------------------------

pub const CONFIG_FILE: &str = "ferry.yaml";
pub const STATE_DIR: &str = ".ferry";
pub const CHECKPOINT_FILE: &str = ".ferry/checkpoint.json";
pub const SCHEDULE_STATE_FILE: &str = ".ferry/schedule-state.json";
pub const PID_FILE: &str = ".ferry/scheduler.pid";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Resolve `path` against `base` unless it is already absolute.
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// `checkpoint.json` -> `checkpoint.dry-run.json`. Rehearsals keep their own cursor.
pub fn dry_run_sibling(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "checkpoint".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{stem}.dry-run.{}", ext.to_string_lossy()),
        None => format!("{stem}.dry-run"),
    };
    path.with_file_name(name)
}

/// `state.json` -> `state.json.corrupt`.
pub fn corrupt_sibling(path: &Path) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".corrupt");
    path.with_file_name(name)
}

// ---------------------------------------------------------------------------
// SQL identifiers
// ---------------------------------------------------------------------------

fn identifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("valid regex"))
}

/// Table names are interpolated into queries, so only plain identifiers pass.
pub fn validate_identifier(name: &str) -> Result<()> {
    if identifier_regex().is_match(name) {
        Ok(())
    } else {
        Err(FerryError::InvalidConfig(format!(
            "'{name}' is not a valid table name"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_keeps_absolute_paths() {
        let base = Path::new("/srv/ferry");
        assert_eq!(
            resolve(base, Path::new("/var/lib/x.json")),
            PathBuf::from("/var/lib/x.json")
        );
        assert_eq!(
            resolve(base, Path::new(".ferry/x.json")),
            PathBuf::from("/srv/ferry/.ferry/x.json")
        );
    }

    #[test]
    fn dry_run_sibling_inserts_marker_before_extension() {
        assert_eq!(
            dry_run_sibling(Path::new("/a/.ferry/checkpoint.json")),
            PathBuf::from("/a/.ferry/checkpoint.dry-run.json")
        );
        assert_eq!(
            dry_run_sibling(Path::new("/a/progress")),
            PathBuf::from("/a/progress.dry-run")
        );
    }

    #[test]
    fn corrupt_sibling_appends_suffix() {
        assert_eq!(
            corrupt_sibling(Path::new("/a/checkpoint.json")),
            PathBuf::from("/a/checkpoint.json.corrupt")
        );
    }

    #[test]
    fn identifiers() {
        assert!(validate_identifier("images").is_ok());
        assert!(validate_identifier("image_assets").is_ok());
        assert!(validate_identifier("images; DROP TABLE x").is_err());
        assert!(validate_identifier("1images").is_err());
        assert!(validate_identifier("").is_err());
    }
}
