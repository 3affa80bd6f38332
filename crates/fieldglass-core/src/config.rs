//! Layered configuration resolution, grounded on
//! `tandem-core::config::ConfigStore` idiom (global/project/env/cli layers
//! merged in a fixed order) but narrowed to `RunOptions`'s typed scalar
//! fields, since there is no project-wide JSON document to deep-merge here.
//!
//! Precedence, lowest to highest: built-in default, `fieldglass.toml`,
//! `FIELDGLASS_*` environment variables, the explicit [`RunOptionsOverrides`]
//! passed to [`resolve`].

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::options::{RunOptions, RunOptionsOverrides};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// The `fieldglass.toml` shape. Every field optional: an absent key simply
/// doesn't participate at this layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
struct FileLayer {
    max_steps_per_milestone: Option<u32>,
    max_retries: Option<u32>,
    max_milestone_attempts: Option<u32>,
    active_context_budget: Option<u64>,
    checkpoint_every: Option<u32>,
    enable_planner: Option<bool>,
    enable_verification: Option<bool>,
}

impl FileLayer {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source: e,
                })
            }
        };
        toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })
    }
}

#[derive(Debug, Clone, Default)]
struct EnvLayer {
    max_steps_per_milestone: Option<u32>,
    max_retries: Option<u32>,
    max_milestone_attempts: Option<u32>,
    active_context_budget: Option<u64>,
    checkpoint_every: Option<u32>,
    enable_planner: Option<bool>,
    enable_verification: Option<bool>,
}

impl EnvLayer {
    fn load() -> Self {
        Self {
            max_steps_per_milestone: env_parsed("FIELDGLASS_MAX_STEPS_PER_MILESTONE"),
            max_retries: env_parsed("FIELDGLASS_MAX_RETRIES"),
            max_milestone_attempts: env_parsed("FIELDGLASS_MAX_MILESTONE_ATTEMPTS"),
            active_context_budget: env_parsed("FIELDGLASS_ACTIVE_CONTEXT_BUDGET"),
            checkpoint_every: env_parsed("FIELDGLASS_CHECKPOINT_EVERY"),
            enable_planner: env_parsed("FIELDGLASS_ENABLE_PLANNER"),
            enable_verification: env_parsed("FIELDGLASS_ENABLE_VERIFICATION"),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Fold one tunable through all four layers, highest-precedence first.
fn pick<T>(explicit: Option<T>, env: Option<T>, file: Option<T>, default: T) -> T {
    explicit.or(env).or(file).unwrap_or(default)
}

/// Resolve a [`RunOptions`] from `config_path` (read if present, ignored if
/// absent), the process environment, and `overrides`. Deterministic: the
/// same three inputs always produce the same `RunOptions`.
pub fn resolve(config_path: Option<&Path>, overrides: RunOptionsOverrides) -> Result<RunOptions, ConfigError> {
    let file = match config_path {
        Some(path) => FileLayer::load(path)?,
        None => FileLayer::default(),
    };
    let env = EnvLayer::load();
    let default = RunOptions::default();

    Ok(RunOptions {
        max_steps_per_milestone: pick(
            overrides.max_steps_per_milestone,
            env.max_steps_per_milestone,
            file.max_steps_per_milestone,
            default.max_steps_per_milestone,
        ),
        max_retries: pick(overrides.max_retries, env.max_retries, file.max_retries, default.max_retries),
        max_milestone_attempts: pick(
            overrides.max_milestone_attempts,
            env.max_milestone_attempts,
            file.max_milestone_attempts,
            default.max_milestone_attempts,
        ),
        active_context_budget: pick(
            overrides.active_context_budget,
            env.active_context_budget,
            file.active_context_budget,
            default.active_context_budget,
        ),
        checkpoint_every: pick(
            overrides.checkpoint_every,
            env.checkpoint_every,
            file.checkpoint_every,
            default.checkpoint_every,
        ),
        enable_planner: pick(overrides.enable_planner, env.enable_planner, file.enable_planner, default.enable_planner),
        enable_verification: pick(
            overrides.enable_verification,
            env.enable_verification,
            file.enable_verification,
            default.enable_verification,
        ),
        app_allowlist: overrides.app_allowlist.unwrap_or(default.app_allowlist),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // FIELDGLASS_* env vars are process-global; serialize the tests that set
    // them so they can't interleave with each other.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "FIELDGLASS_MAX_STEPS_PER_MILESTONE",
            "FIELDGLASS_MAX_RETRIES",
            "FIELDGLASS_MAX_MILESTONE_ATTEMPTS",
            "FIELDGLASS_ACTIVE_CONTEXT_BUDGET",
            "FIELDGLASS_CHECKPOINT_EVERY",
            "FIELDGLASS_ENABLE_PLANNER",
            "FIELDGLASS_ENABLE_VERIFICATION",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn defaults_apply_when_nothing_else_is_set() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let resolved = resolve(None, RunOptionsOverrides::default()).unwrap();
        assert_eq!(resolved.max_steps_per_milestone, 15);
        assert_eq!(resolved.max_retries, 3);
        assert_eq!(resolved.max_milestone_attempts, 2);
        assert!(resolved.enable_planner);
        assert!(resolved.enable_verification);
    }

    #[test]
    fn file_layer_overrides_default() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fieldglass.toml");
        std::fs::write(&path, "max_retries = 7\nenable_planner = false\n").unwrap();

        let resolved = resolve(Some(&path), RunOptionsOverrides::default()).unwrap();
        assert_eq!(resolved.max_retries, 7);
        assert!(!resolved.enable_planner);
        assert_eq!(resolved.max_steps_per_milestone, 15); // untouched by file, falls to default
    }

    #[test]
    fn env_layer_overrides_file_layer() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fieldglass.toml");
        std::fs::write(&path, "max_retries = 7\n").unwrap();
        std::env::set_var("FIELDGLASS_MAX_RETRIES", "9");

        let resolved = resolve(Some(&path), RunOptionsOverrides::default()).unwrap();
        assert_eq!(resolved.max_retries, 9);
        clear_env();
    }

    #[test]
    fn explicit_override_wins_over_everything() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fieldglass.toml");
        std::fs::write(&path, "max_retries = 7\n").unwrap();
        std::env::set_var("FIELDGLASS_MAX_RETRIES", "9");

        let overrides = RunOptionsOverrides {
            max_retries: Some(1),
            ..Default::default()
        };
        let resolved = resolve(Some(&path), overrides).unwrap();
        assert_eq!(resolved.max_retries, 1);
        clear_env();
    }

    #[test]
    fn missing_config_file_falls_through_silently() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let resolved = resolve(Some(Path::new("/nonexistent/fieldglass.toml")), RunOptionsOverrides::default()).unwrap();
        assert_eq!(resolved.max_retries, 3);
    }
}
