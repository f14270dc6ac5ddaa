//! Built-in values for every configuration key.
//!
//! An empty config directory is a valid configuration: anything not set in
//! `global.conf` or an application record falls back to this table. The
//! command templates target a Laravel application on a Debian-style host.

// =============================================================================
// Paths and limits
// =============================================================================

pub fn default_apps_root() -> &'static str {
    "/var/www"
}

pub fn default_backup_root() -> &'static str {
    "/var/backups/shipyard"
}

pub fn default_report_dir() -> &'static str {
    "/var/log/shipyard"
}

pub fn default_state_dir() -> &'static str {
    "/var/lib/shipyard"
}

pub fn default_runtime_version() -> &'static str {
    "8.3"
}

pub fn default_max_backups() -> usize {
    5
}

pub fn default_retention_days() -> u32 {
    30
}

pub fn default_keep_releases() -> usize {
    5
}

pub fn default_stage_timeout_secs() -> u64 {
    900
}

pub fn default_frameworks() -> &'static str {
    "laravel/framework,laravel/lumen-framework"
}

/// Tools `provision` checks for on PATH.
pub fn default_required_tools() -> &'static str {
    "php,composer,git,mysql,mysqldump"
}

// =============================================================================
// Application files
// =============================================================================

/// Marker file that identifies an application root.
pub const APP_MARKER: &str = "artisan";

/// Package-declaration file that must reference a known framework.
pub const PACKAGE_FILE: &str = "composer.json";

/// Paths never archived in a backup.
pub fn default_backup_excludes() -> Vec<String> {
    [
        "vendor",
        "node_modules",
        ".git",
        "storage/framework/cache",
        "storage/framework/sessions",
        "storage/framework/views",
        "storage/logs",
        "bootstrap/cache",
        "backups",
        "**/*.log",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Extra excludes for zero-downtime roots: releases are rebuilt from source,
/// `current` is repointed from the manifest.
pub fn default_zero_downtime_excludes() -> Vec<String> {
    ["releases", "current"].iter().map(|s| s.to_string()).collect()
}

/// Paths never copied into a fresh release (they are linked from `shared/`).
pub fn default_release_copy_excludes() -> Vec<String> {
    [".git", ".env", "storage", "node_modules", "vendor"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Entries of `shared/` linked into every release.
pub fn default_shared_links() -> &'static [&'static str] {
    &["storage", ".env"]
}

// =============================================================================
// Command templates
// =============================================================================

pub const CLONE_COMMAND: &str =
    "git clone --depth 1 --branch {{branch}} {{repo_url}} {{target_dir}}";

pub const CODE_UPDATE_COMMAND: &str =
    "git fetch --prune origin {{branch}} && git reset --hard origin/{{branch}}";

pub const DEPENDENCY_COMMAND: &str =
    "composer install --no-dev --no-interaction --prefer-dist --optimize-autoloader";

pub const DB_PROVISION_COMMAND: &str = "mysql -e \"CREATE DATABASE IF NOT EXISTS {{db_name}}; \
CREATE USER IF NOT EXISTS '{{db_user}}'@'localhost' IDENTIFIED BY '{{db_password}}'; \
GRANT ALL PRIVILEGES ON {{db_name}}.* TO '{{db_user}}'@'localhost'; FLUSH PRIVILEGES;\"";

pub const MIGRATE_COMMAND: &str = "php artisan migrate --force";

pub const ASSET_COMMAND: &str = "[ ! -f package.json ] || (npm ci && npm run build)";

pub const OPTIMIZE_COMMAND: &str =
    "php artisan config:cache && php artisan route:cache && php artisan view:cache";

pub const RELOAD_COMMAND: &str = "systemctl reload php{{runtime_version}}-fpm";

pub const QUEUE_COMMAND: &str = "php artisan queue:restart";

pub const SCHEDULER_COMMAND: &str = "printf '* * * * * www-data cd {{live_dir}} && php artisan schedule:run >> /dev/null 2>&1\\n' > /etc/cron.d/shipyard-{{app_name}}";

pub const VERIFY_COMMAND: &str = "php artisan --version";

pub const DB_DUMP_COMMAND: &str = "mysqldump --single-transaction --routines --triggers {{db_name}}";

pub const DB_RESTORE_COMMAND: &str = "mysql {{db_name}}";

pub const DB_OPTIMIZE_COMMAND: &str = "mysqlcheck --optimize {{db_name}}";

pub const SSL_COMMAND: &str =
    "certbot --nginx --non-interactive --agree-tos -m {{ssl_email}} -d {{domain}}";

/// Default for a configuration key, if it has one.
pub fn default_value(key: &str) -> Option<String> {
    let value = match key {
        "APPS_ROOT" => default_apps_root().to_string(),
        "BACKUP_ROOT" => default_backup_root().to_string(),
        "REPORT_DIR" => default_report_dir().to_string(),
        "STATE_DIR" => default_state_dir().to_string(),
        "DEFAULT_PHP_VERSION" => default_runtime_version().to_string(),
        "DOMAIN_SUFFIX" => "localhost".to_string(),
        "MAX_BACKUPS" => default_max_backups().to_string(),
        "RETENTION_DAYS" => default_retention_days().to_string(),
        "KEEP_RELEASES" => default_keep_releases().to_string(),
        "STAGE_TIMEOUT" => default_stage_timeout_secs().to_string(),
        "REQUIRE_ROOT" => "true".to_string(),
        "FRAMEWORKS" => default_frameworks().to_string(),
        "REQUIRED_TOOLS" => default_required_tools().to_string(),
        "STAGES" => crate::pipeline::StageKind::all()
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(","),

        "SSL_ENABLED" | "QUEUE_ENABLED" | "SCHEDULER_ENABLED" | "ZERO_DOWNTIME" => {
            "false".to_string()
        }
        "BACKUP_SCHEDULE" => "0 2 * * *".to_string(),
        "DEPLOY_METHOD" => "git".to_string(),
        "BRANCH" => "main".to_string(),
        "DB_HOST" => "127.0.0.1".to_string(),

        "CLONE_COMMAND" => CLONE_COMMAND.to_string(),
        "CODE_UPDATE_COMMAND" => CODE_UPDATE_COMMAND.to_string(),
        "DEPENDENCY_COMMAND" => DEPENDENCY_COMMAND.to_string(),
        "DB_PROVISION_COMMAND" => DB_PROVISION_COMMAND.to_string(),
        "MIGRATE_COMMAND" => MIGRATE_COMMAND.to_string(),
        "ASSET_COMMAND" => ASSET_COMMAND.to_string(),
        "OPTIMIZE_COMMAND" => OPTIMIZE_COMMAND.to_string(),
        "RELOAD_COMMAND" => RELOAD_COMMAND.to_string(),
        "QUEUE_COMMAND" => QUEUE_COMMAND.to_string(),
        "SCHEDULER_COMMAND" => SCHEDULER_COMMAND.to_string(),
        "VERIFY_COMMAND" => VERIFY_COMMAND.to_string(),
        "DB_DUMP_COMMAND" => DB_DUMP_COMMAND.to_string(),
        "DB_RESTORE_COMMAND" => DB_RESTORE_COMMAND.to_string(),
        "DB_OPTIMIZE_COMMAND" => DB_OPTIMIZE_COMMAND.to_string(),
        "SSL_COMMAND" => SSL_COMMAND.to_string(),
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_command_key_has_a_default() {
        for key in ["MIGRATE_COMMAND", "DB_DUMP_COMMAND", "SSL_COMMAND", "CLONE_COMMAND"] {
            assert!(default_value(key).is_some_and(|v| !v.is_empty()), "{}", key);
        }
        assert_eq!(default_value("PRE_DEPLOY_HOOK"), None);
    }

    #[test]
    fn default_stage_list_is_in_pipeline_order() {
        let stages = default_value("STAGES").unwrap();
        assert!(stages.starts_with("pre_hooks,backup,code_update"));
        assert!(stages.ends_with("post_hooks,verify"));
    }
}
