use crate::cmd::collect_warnings;
use crate::output::print_json;
use crate::root;
use anyhow::Context;
use clap::Subcommand;
use ferry_core::config::{Config, WarnLevel};
use ferry_core::io;
use std::path::Path;

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Write a commented ferry.yaml template (never overwrites)
    Init,

    /// Validate the config for common mistakes
    Validate,

    /// Print the resolved config with credentials masked
    Show,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(explicit: Option<&Path>, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Init => init(&root::init_target(explicit)?, json),
        ConfigSubcommand::Validate => validate(&root::resolve_config_path(explicit)?, json),
        ConfigSubcommand::Show => show(&root::resolve_config_path(explicit)?, json),
    }
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

fn init(path: &Path, json: bool) -> anyhow::Result<()> {
    let created = io::write_if_missing(path, Config::template().as_bytes())
        .with_context(|| format!("failed to write {}", path.display()))?;

    if json {
        print_json(&serde_json::json!({
            "path": path,
            "created": created,
        }))?;
    } else if created {
        println!("Wrote {}", path.display());
        println!("Fill in the catalog URL and bucket settings, then run 'ferry config validate'.");
    } else {
        println!("{} already exists; left unchanged.", path.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(path: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(path).context("failed to load config")?;
    let warnings = collect_warnings(&config, true);

    if json {
        let value = serde_json::json!({
            "path": config.path,
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    let has_errors = warnings.iter().any(|w| w.level == WarnLevel::Error);
    if has_errors {
        anyhow::bail!("config validation found errors");
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(path: &Path, json: bool) -> anyhow::Result<()> {
    let config = Config::load(path).context("failed to load config")?;
    let redacted = config.redacted();
    if json {
        print_json(&redacted)?;
    } else {
        println!("# {}", config.path.display());
        print!("{}", serde_yaml::to_string(&redacted)?);
    }
    Ok(())
}
