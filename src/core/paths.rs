use crate::error::{Error, Result};
use std::env;
use std::path::{Path, PathBuf};

pub const CONFIG_DIR_ENV: &str = "SHIPYARD_CONFIG_DIR";

/// Metadata file written at the root of every release directory.
pub const RELEASE_METADATA: &str = ".shipyard-release.json";

/// Resolve the config directory: explicit flag, then `SHIPYARD_CONFIG_DIR`,
/// then `/etc/shipyard` for root, then `~/.config/shipyard`.
pub fn config_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(expand(dir));
    }
    if let Ok(dir) = env::var(CONFIG_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(expand(Path::new(&dir)));
        }
    }
    if crate::host::is_root() {
        return Ok(PathBuf::from("/etc/shipyard"));
    }

    let home = env::var("HOME").map_err(|_| {
        Error::internal_unexpected("HOME environment variable not set".to_string())
    })?;
    Ok(PathBuf::from(home).join(".config").join("shipyard"))
}

/// Expand a leading `~` and environment variables in a configured path.
pub fn expand(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(&raw).as_ref()),
    }
}

/// Global config record
pub fn global_config(config_dir: &Path) -> PathBuf {
    config_dir.join("global.conf")
}

/// Directory of per-application config records
pub fn app_configs(config_dir: &Path) -> PathBuf {
    config_dir.join("apps")
}

pub fn app_config(config_dir: &Path, app: &str) -> PathBuf {
    app_configs(config_dir).join(format!("{}.conf", app))
}

pub fn locks(state_dir: &Path) -> PathBuf {
    state_dir.join("locks")
}

pub fn lock(state_dir: &Path, app: &str) -> PathBuf {
    locks(state_dir).join(format!("{}.lock", app))
}

pub fn history(state_dir: &Path, app: &str) -> PathBuf {
    state_dir.join("history").join(format!("{}.json", app))
}

/// Backups for one application
pub fn app_backups(backup_root: &Path, app: &str) -> PathBuf {
    backup_root.join(app)
}

pub fn releases(app_root: &Path) -> PathBuf {
    app_root.join("releases")
}

pub fn release(app_root: &Path, release_id: &str) -> PathBuf {
    releases(app_root).join(release_id)
}

pub fn shared(app_root: &Path) -> PathBuf {
    app_root.join("shared")
}

pub fn current(app_root: &Path) -> PathBuf {
    app_root.join("current")
}

/// Environment file of an application. Zero-downtime applications keep it
/// in `shared/` and every release links to it.
pub fn env_file(app_root: &Path, zero_downtime: bool) -> PathBuf {
    if zero_downtime {
        shared(app_root).join(".env")
    } else {
        app_root.join(".env")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_wins() {
        let dir = config_dir(Some(Path::new("/srv/shipyard-conf"))).unwrap();
        assert_eq!(dir, PathBuf::from("/srv/shipyard-conf"));
    }

    #[test]
    fn app_config_lives_under_apps() {
        assert_eq!(
            app_config(Path::new("/etc/shipyard"), "shop"),
            PathBuf::from("/etc/shipyard/apps/shop.conf")
        );
    }

    #[test]
    fn env_file_location_depends_on_mode() {
        let root = Path::new("/var/www/shop");
        assert_eq!(env_file(root, false), PathBuf::from("/var/www/shop/.env"));
        assert_eq!(env_file(root, true), PathBuf::from("/var/www/shop/shared/.env"));
    }
}
