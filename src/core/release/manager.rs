use std::fs;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};

use chrono::Utc;

use super::types::{Release, ReleaseMetadata, ReleaseSource};
use crate::defaults;
use crate::error::{Error, Result};
use crate::exec::{self, RunLimits};
use crate::paths;
use crate::registry::{Application, DeployMethod};
use crate::utils::template::TemplateVars;
use crate::utils::{archive, io, stamp};

/// Create `releases/` and the `shared/` subtree if missing.
pub fn ensure_layout(root: &Path) -> Result<()> {
    io::ensure_dir(&paths::releases(root), "create releases directory")?;
    let shared = paths::shared(root);
    for sub in [
        "storage/app/public",
        "storage/framework/cache",
        "storage/framework/sessions",
        "storage/framework/views",
        "storage/logs",
    ] {
        io::ensure_dir(&shared.join(sub), "create shared storage")?;
    }

    let env = shared.join(".env");
    if !env.exists() {
        io::write_file_atomic_with_mode(&env, "", 0o600, "create shared .env")?;
    }
    Ok(())
}

fn metadata_path(dir: &Path) -> PathBuf {
    dir.join(paths::RELEASE_METADATA)
}

fn read_metadata(dir: &Path) -> Result<ReleaseMetadata> {
    io::read_json(&metadata_path(dir), "read release metadata")
}

fn release_dir(app: &Application, release_id: &str) -> Result<PathBuf> {
    crate::utils::validation::require_identifier(release_id, "release")?;
    let dir = paths::release(&app.root_path, release_id);
    if !dir.is_dir() {
        return Err(Error::release_not_found(&app.name, release_id));
    }
    Ok(dir)
}

/// Id of the release `current` points at.
pub fn current_release(root: &Path) -> Option<String> {
    let target = fs::read_link(paths::current(root)).ok()?;
    target.file_name()?.to_str().map(str::to_string)
}

/// Materialize a new release directory with fresh code and links to the
/// shared subtree. The live release is never touched. On failure the new
/// directory is removed.
pub fn prepare_release(app: &Application, limits: &RunLimits) -> Result<Release> {
    ensure_layout(&app.root_path)?;
    let (id, dir) = stamp::allocate_dir(
        &paths::releases(&app.root_path),
        stamp::RELEASE_FORMAT,
        Utc::now(),
    )?;
    let release_id = id.to_string();

    match populate(app, &release_id, &dir, limits) {
        Ok(source) => {
            let meta = ReleaseMetadata {
                app: app.name.clone(),
                release_id: release_id.clone(),
                created_at: id.created_at(),
                source,
                ready: false,
                ready_at: None,
            };
            io::write_json_atomic(&metadata_path(&dir), &meta, "write release metadata")?;
            crate::log_status!("release", "Prepared release {} for {}", release_id, app.name);
            Ok(Release {
                app_name: app.name.clone(),
                release_id,
                directory: dir,
                created_at: meta.created_at,
                ready: false,
                active: false,
            })
        }
        Err(err) => {
            if let Err(cleanup) = io::remove_path(&dir, "discard failed release") {
                tracing::warn!(app = %app.name, error = %cleanup.describe(), "Could not remove failed release");
            }
            Err(err)
        }
    }
}

fn populate(app: &Application, release_id: &str, dir: &Path, limits: &RunLimits) -> Result<ReleaseSource> {
    let source = match app.deployment_method {
        DeployMethod::Git => {
            if app.repo_url.is_none() {
                return Err(Error::config_missing_key("REPO_URL", None)
                    .with_hint("Set REPO_URL or use DEPLOY_METHOD=local with SOURCE_PATH"));
            }
            let rendered = exec::render_command(
                app,
                "CLONE_COMMAND",
                dir,
                &[
                    (TemplateVars::TARGET_DIR, dir.display().to_string()),
                    (TemplateVars::RELEASE_ID, release_id.to_string()),
                ],
            )
            .ok_or_else(|| Error::config_missing_key("CLONE_COMMAND", None))?;
            exec::run_step(app, "code_update", &rendered, &paths::releases(&app.root_path), limits)?;
            ReleaseSource::Git
        }
        DeployMethod::Local => {
            let source = match &app.source_path {
                Some(path) => path.clone(),
                None if current_release(&app.root_path).is_some() => paths::current(&app.root_path),
                None => {
                    return Err(Error::config_missing_key("SOURCE_PATH", None)
                        .with_hint("Local deployments copy from SOURCE_PATH (or the live release)"))
                }
            };
            let mut excludes = defaults::default_release_copy_excludes();
            excludes.push(paths::RELEASE_METADATA.to_string());
            let copied = archive::copy_tree(&source, dir, &excludes)?;
            tracing::debug!(app = %app.name, files = copied, "Copied release source");
            ReleaseSource::Local
        }
    };

    link_shared(&app.root_path, dir)?;
    Ok(source)
}

/// Replace shared entries in the release with links into `shared/`.
fn link_shared(root: &Path, dir: &Path) -> Result<()> {
    let shared = paths::shared(root);
    for entry in defaults::default_shared_links() {
        let target_in_release = dir.join(entry);
        io::remove_path(&target_in_release, "replace shared entry")?;
        let relative = Path::new("../../shared").join(entry);
        if !shared.join(entry).exists() {
            return Err(Error::internal_io(
                format!("{} is missing", shared.join(entry).display()),
                Some("link shared entry".to_string()),
            ));
        }
        symlink(&relative, &target_in_release).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("link {}", target_in_release.display())))
        })?;
    }
    Ok(())
}

/// Record that every build stage completed inside the release.
pub fn mark_ready(app: &Application, release_id: &str) -> Result<()> {
    let dir = release_dir(app, release_id)?;
    let mut meta = read_metadata(&dir)?;
    meta.ready = true;
    meta.ready_at = Some(Utc::now());
    io::write_json_atomic(&metadata_path(&dir), &meta, "write release metadata")
}

/// Atomically repoint `current` at `releases/<release_id>`: a new link is
/// created beside it and renamed over it, so readers see the old or the new
/// target and nothing in between.
pub fn switch_current(root: &Path, release_id: &str) -> Result<()> {
    let current = paths::current(root);
    let tmp = root.join(format!(".current.{}.tmp", std::process::id()));
    io::remove_path(&tmp, "remove stale link")?;

    let target = Path::new("releases").join(release_id);
    symlink(&target, &tmp)
        .map_err(|e| Error::internal_io(e.to_string(), Some("create current link".to_string())))?;

    if let Err(e) = fs::rename(&tmp, &current) {
        let _ = fs::remove_file(&tmp);
        return Err(Error::internal_io(
            e.to_string(),
            Some(format!("swap {}", current.display())),
        ));
    }
    Ok(())
}

/// Switch traffic to a ready release, then ask the process manager to reload
/// workers. A failed reload is returned as a warning: the switch has happened.
pub fn activate(app: &Application, release_id: &str, limits: &RunLimits) -> Result<Vec<String>> {
    let dir = release_dir(app, release_id)?;
    let meta = read_metadata(&dir)?;
    if !meta.ready {
        return Err(Error::validation_invalid_argument(
            "release",
            format!("Release {} has not completed its build stages", release_id),
            Some(release_id.to_string()),
            None,
        ));
    }

    let previous = current_release(&app.root_path);
    switch_current(&app.root_path, release_id)?;
    crate::log_status!(
        "release",
        "Activated {} for {} (was {})",
        release_id,
        app.name,
        previous.as_deref().unwrap_or("none")
    );

    let mut warnings = Vec::new();
    let live = paths::current(&app.root_path);
    if let Err(err) = exec::run_configured(app, "activate", "RELOAD_COMMAND", &live, limits) {
        tracing::warn!(app = %app.name, error = %err.describe(), "Worker reload failed");
        warnings.push(format!("reload failed: {}", err.describe()));
    }
    Ok(warnings)
}

/// All releases, newest first.
pub fn list_releases(app: &Application) -> Result<Vec<Release>> {
    let current = current_release(&app.root_path);
    let ids = stamp::list_ids_desc(&paths::releases(&app.root_path))?;
    Ok(ids
        .into_iter()
        .map(|id| {
            let release_id = id.to_string();
            let directory = paths::release(&app.root_path, &release_id);
            let ready = read_metadata(&directory).map(|m| m.ready).unwrap_or(false);
            Release {
                app_name: app.name.clone(),
                active: current.as_deref() == Some(release_id.as_str()),
                created_at: id.created_at(),
                release_id,
                directory,
                ready,
            }
        })
        .collect())
}

/// Delete releases outside the newest `keep_n`, never the active one.
/// Returns the removed ids.
pub fn prune_releases(app: &Application, keep_n: usize) -> Result<Vec<String>> {
    let releases = list_releases(app)?;
    let mut removed = Vec::new();
    for release in releases.into_iter().skip(keep_n) {
        if release.active {
            continue;
        }
        io::remove_path(&release.directory, "prune release")?;
        removed.push(release.release_id);
    }
    if !removed.is_empty() {
        crate::log_status!("release", "Pruned {} release(s) of {}", removed.len(), app.name);
    }
    Ok(removed)
}

/// Remove a release that never went live.
pub fn discard(app: &Application, release_id: &str) -> Result<()> {
    if current_release(&app.root_path).as_deref() == Some(release_id) {
        return Err(Error::validation_invalid_argument(
            "release",
            format!("Release {} is live and cannot be discarded", release_id),
            Some(release_id.to_string()),
            None,
        ));
    }
    io::remove_path(&paths::release(&app.root_path, release_id), "discard release")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::CancelToken;
    use crate::testing::Fixture;
    use std::time::Duration;

    fn limits() -> RunLimits {
        RunLimits::new(Duration::from_secs(30), CancelToken::detached())
    }

    fn ready_release(app: &Application) -> Release {
        let release = prepare_release(app, &limits()).unwrap();
        mark_ready(app, &release.release_id).unwrap();
        release
    }

    #[test]
    fn prepare_copies_source_and_links_shared() {
        let fx = Fixture::new();
        let app = fx.zero_downtime_app("shop", "");
        fs::write(app.source_path.as_ref().unwrap().join(".env"), "LOCAL=1").unwrap();

        let release = prepare_release(&app, &limits()).unwrap();

        assert!(release.directory.join("artisan").is_file());
        assert_eq!(
            fs::read_link(release.directory.join(".env")).unwrap(),
            Path::new("../../shared/.env")
        );
        assert!(release.directory.join("storage").join("logs").is_dir());
        assert!(!release.ready);
        assert!(current_release(&app.root_path).is_none());
    }

    #[test]
    fn activate_refuses_a_release_that_is_not_ready() {
        let fx = Fixture::new();
        let app = fx.zero_downtime_app("shop", "");
        let release = prepare_release(&app, &limits()).unwrap();

        let err = activate(&app, &release.release_id, &limits()).unwrap_err();
        assert_eq!(err.code.as_str(), "validation.invalid_argument");
        assert!(current_release(&app.root_path).is_none());
    }

    #[test]
    fn activate_switches_current_and_reload_failure_is_a_warning() {
        let fx = Fixture::new();
        let app = fx.zero_downtime_app("shop", "RELOAD_COMMAND=false\n");
        let first = ready_release(&app);
        let warnings = activate(&app, &first.release_id, &limits()).unwrap();

        assert_eq!(current_release(&app.root_path), Some(first.release_id.clone()));
        assert_eq!(warnings.len(), 1);
        assert!(paths::current(&app.root_path).join("artisan").is_file());

        let second = ready_release(&app);
        activate(&app, &second.release_id, &limits()).unwrap();
        assert_eq!(current_release(&app.root_path), Some(second.release_id));
    }

    #[test]
    fn failed_clone_discards_the_directory() {
        let fx = Fixture::new();
        let app = fx.zero_downtime_app(
            "shop",
            "DEPLOY_METHOD=git\nREPO_URL=file:///nonexistent\nCLONE_COMMAND=\"exit 2\"\n",
        );

        let err = prepare_release(&app, &limits()).unwrap_err();
        assert_eq!(err.code.as_str(), "deploy.stage_failed");
        assert!(list_releases(&app).unwrap().is_empty());
    }

    #[test]
    fn prune_keeps_newest_and_the_active_release() {
        let fx = Fixture::new();
        let app = fx.zero_downtime_app("shop", "");
        let releases_dir = paths::releases(&app.root_path);
        for id in ["20260101000000", "20260102000000", "20260103000000", "20260104000000"] {
            fs::create_dir_all(releases_dir.join(id)).unwrap();
        }
        switch_current(&app.root_path, "20260101000000").unwrap();

        let removed = prune_releases(&app, 2).unwrap();

        assert_eq!(removed, vec!["20260102000000".to_string()]);
        let left: Vec<String> = list_releases(&app)
            .unwrap()
            .into_iter()
            .map(|r| r.release_id)
            .collect();
        assert_eq!(left, vec!["20260104000000", "20260103000000", "20260101000000"]);
    }

    #[test]
    fn discard_refuses_the_live_release() {
        let fx = Fixture::new();
        let app = fx.zero_downtime_app("shop", "");
        let release = ready_release(&app);
        activate(&app, &release.release_id, &limits()).unwrap();

        assert!(discard(&app, &release.release_id).is_err());
    }
}
