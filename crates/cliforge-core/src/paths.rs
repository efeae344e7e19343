//! XDG base-directory resolution for the generated binary.
//!
//! Layout:
//!   `<config_home>/<app>/config.yaml`            user configuration
//!   `<state_home>/<app>/workflows/<id>.json`     workflow checkpoints
//!   `<cache_home>/<app>/<sha256>.json`           spec cache entries

use std::env;
use std::path::PathBuf;

fn home_dir() -> PathBuf {
    env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."))
}

fn xdg_dir(var: &str, fallback: &[&str]) -> PathBuf {
    match env::var_os(var) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let mut path = home_dir();
            for part in fallback {
                path.push(part);
            }
            path
        }
    }
}

pub fn config_home(app: &str) -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", &[".config"]).join(app)
}

pub fn state_home(app: &str) -> PathBuf {
    xdg_dir("XDG_STATE_HOME", &[".local", "state"]).join(app)
}

pub fn cache_home(app: &str) -> PathBuf {
    xdg_dir("XDG_CACHE_HOME", &[".cache"]).join(app)
}

/// Directory where workflow checkpoints are written
pub fn workflow_state_dir(app: &str) -> PathBuf {
    state_home(app).join("workflows")
}

/// The user configuration file, honouring `<PREFIX>_CONFIG`
pub fn user_config_path(app: &str, env_prefix: &str) -> PathBuf {
    if let Ok(custom) = env::var(format!("{}_CONFIG", env_prefix)) {
        if !custom.is_empty() {
            return PathBuf::from(custom);
        }
    }
    config_home(app).join("config.yaml")
}
