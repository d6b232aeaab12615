use std::path::PathBuf;
use std::sync::OnceLock;

static CORE_HOME: OnceLock<PathBuf> = OnceLock::new();

/// Returns the core's home directory (`~/.coreagent/`).
/// Supports `$COREAGENT_HOME` env override. Cached via `OnceLock`.
pub fn core_home() -> &'static PathBuf {
    CORE_HOME.get_or_init(|| {
        if let Ok(val) = std::env::var("COREAGENT_HOME") {
            let p = PathBuf::from(val);
            if !p.as_os_str().is_empty() {
                return p;
            }
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".coreagent")
    })
}

/// `~/.coreagent/config/`
pub fn config_dir() -> PathBuf {
    core_home().join("config")
}

/// `~/.coreagent/logs/`
pub fn logs_dir() -> PathBuf {
    core_home().join("logs")
}

/// `~/.coreagent/roles/`
pub fn global_roles_dir() -> PathBuf {
    core_home().join("roles")
}
