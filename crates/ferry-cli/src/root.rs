use ferry_core::paths::CONFIG_FILE;
use std::path::{Path, PathBuf};

/// Resolve the config file to use.
///
/// Priority:
/// 1. `--config` flag / `FERRY_CONFIG` env var (passed in as `explicit`)
/// 2. Walk upward from `cwd` looking for `ferry.yaml`
pub fn resolve_config_path(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    let cwd = std::env::current_dir()?;
    find_upward(&cwd).ok_or_else(|| {
        anyhow::anyhow!(
            "no {CONFIG_FILE} found in {} or any parent directory; run 'ferry config init' or pass --config",
            cwd.display()
        )
    })
}

/// Where `ferry config init` writes: the explicit path, else `./ferry.yaml`.
pub fn init_target(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    match explicit {
        Some(p) => Ok(p.to_path_buf()),
        None => Ok(std::env::current_dir()?.join(CONFIG_FILE)),
    }
}

fn find_upward(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}
