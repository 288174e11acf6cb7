use std::{
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use {
    anyhow::Context,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::ParlorConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["parlor.toml", "parlor.yaml", "parlor.yml", "parlor.json"];

/// Override for the config directory, set via `set_config_dir()`.
static CONFIG_DIR_OVERRIDE: Mutex<Option<PathBuf>> = Mutex::new(None);

fn dir_override() -> MutexGuard<'static, Option<PathBuf>> {
    CONFIG_DIR_OVERRIDE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

/// Set a custom config directory. When set, discovery only looks in this
/// directory; project-local and user-global paths are skipped.
pub fn set_config_dir(path: PathBuf) {
    *dir_override() = Some(path);
}

/// Clear the config directory override, restoring default discovery.
pub fn clear_config_dir() {
    *dir_override() = None;
}

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<ParlorConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path).with_context(|| format!("failed to parse {}", path.display()))
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./parlor.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/parlor/parlor.{toml,yaml,yml,json}` (user-global)
///
/// Returns `ParlorConfig::default()` if no file is found or the file fails
/// to parse.
pub fn discover_and_load() -> ParlorConfig {
    let Some(path) = find_config_file() else {
        debug!("no config file found, using defaults");
        return ParlorConfig::default();
    };

    debug!(path = %path.display(), "loading config");
    match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            ParlorConfig::default()
        },
    }
}

fn find_config_file() -> Option<PathBuf> {
    if let Some(dir) = dir_override().clone() {
        // Override is set, don't fall through to other locations.
        return first_existing(&dir);
    }

    first_existing(Path::new(".")).or_else(|| user_config_dir().and_then(|d| first_existing(&d)))
}

fn first_existing(dir: &Path) -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the config directory: override, or `~/.config/parlor/`.
pub fn config_dir() -> Option<PathBuf> {
    if let Some(dir) = dir_override().clone() {
        return Some(dir);
    }
    user_config_dir()
}

fn user_config_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.home_dir().join(".config").join("parlor"))
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<ParlorConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
