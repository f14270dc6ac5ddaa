mod common;

use std::fs;

use chrono::Utc;

use common::Host;
use shipyard::backup::BackupManager;
use shipyard::datastore::CommandDataStore;
use shipyard::defaults;
use shipyard::interrupt::CancelToken;
use shipyard::lock::AppLock;
use shipyard::pipeline::{Pipeline, RunStatus, StageKind, StageStatus};
use shipyard::release;
use shipyard::report::RunReport;
use shipyard::utils::archive;

fn digest(root: &std::path::Path) -> String {
    archive::tree_digest(root, &defaults::default_backup_excludes()).unwrap()
}

#[test]
fn migration_failure_rolls_back_files_and_data() {
    let host = Host::new();
    let root = host.classic_app(
        "shop",
        &format!(
            "MIGRATE_COMMAND=\"echo 'rows: 0' > {}; echo broken > routes/web.php; exit 1\"\n",
            host.db_file().display()
        ),
    );
    let before = digest(&root);

    let run = host.deploy("shop");

    assert_eq!(run.status, RunStatus::RolledBack);
    assert!(run.rollback_error.is_none());
    let error = run.error.as_ref().unwrap();
    assert_eq!(error.kind, "MigrationError");

    let last = run.stage_results.last().unwrap();
    assert_eq!(last.stage, StageKind::Migrate);
    assert_eq!(last.status, StageStatus::Failed);

    assert_eq!(digest(&root), before);
    assert_eq!(fs::read_to_string(host.db_file()).unwrap(), "rows: 1\n");
}

#[test]
fn failure_before_backup_leaves_state_for_inspection() {
    let host = Host::new();
    let root = host.classic_app("shop", "PRE_DEPLOY_HOOK=\"touch hook-ran; exit 1\"\n");

    let run = host.deploy("shop");

    assert_eq!(run.status, RunStatus::Failed);
    assert!(!run.rollback_eligible);
    assert!(run.rollback_error.is_none());
    assert!(run.backup_id.is_none());
    assert!(root.join("hook-ran").exists());

    let ctx = host.context();
    let manager = BackupManager::new(&ctx.settings, &CommandDataStore);
    assert!(manager.list("shop").unwrap().is_empty());
}

#[test]
fn stage_timeout_is_a_failure_and_rolls_back() {
    let host = Host::with_global("STAGE_TIMEOUT=1\n");
    let root = host.classic_app("shop", "MIGRATE_COMMAND=\"touch half-done; sleep 5\"\n");
    let before = digest(&root);

    let run = host.deploy("shop");

    assert_eq!(run.status, RunStatus::RolledBack);
    assert_eq!(run.error.as_ref().unwrap().code, "deploy.stage_timeout");
    assert_eq!(digest(&root), before);
}

#[test]
fn zero_downtime_failure_before_activation_keeps_previous_release() {
    let host = Host::new();
    let root = host.zero_downtime_app("portal", "");

    let first = host.deploy("portal");
    assert_eq!(first.status, RunStatus::Success, "{:?}", first.error);
    let live = release::current_release(&root).unwrap();
    assert_eq!(first.release_id.as_deref(), Some(live.as_str()));
    assert!(root.join("current/routes/web.php").is_file());
    assert!(root.join("shared/.env").is_file());

    let source = host.path().join("src/portal");
    host.write_record(
        "portal",
        &root,
        &format!(
            "ZERO_DOWNTIME=true\nDEPLOY_METHOD=local\nSOURCE_PATH={}\nDEPENDENCY_COMMAND=false\n",
            source.display()
        ),
    );
    fs::write(source.join("routes/web.php"), "<?php // v2\n").unwrap();

    let second = host.deploy("portal");

    assert_eq!(second.status, RunStatus::RolledBack);
    assert_eq!(release::current_release(&root).as_deref(), Some(live.as_str()));
    assert_eq!(
        fs::read_to_string(root.join("current/routes/web.php")).unwrap(),
        "<?php // v1\n"
    );
    let app = host.resolve("portal");
    let releases = release::list_releases(&app).unwrap();
    assert_eq!(releases.len(), 1);
    assert!(releases[0].active);
}

#[test]
fn locked_application_is_reported_without_being_touched() {
    let host = Host::new();
    let root = host.classic_app("shop", "");
    let ctx = host.context();
    let _held = AppLock::acquire(&ctx.settings.state_dir, "shop").unwrap();
    let before = digest(&root);

    let run = host.deploy("shop");

    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.unwrap().kind, "DeploymentError");
    assert_eq!(digest(&root), before);
}

#[test]
fn one_failing_application_does_not_abort_the_batch() {
    let host = Host::new();
    host.classic_app("alpha", "");
    host.classic_app("beta", "MIGRATE_COMMAND=false\n");
    host.classic_app("gamma", "");

    let ctx = host.context();
    let apps = ctx.applications(None).unwrap();
    let names: Vec<&str> = apps.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta", "gamma"]);

    let started = Utc::now();
    let pipeline = Pipeline::new(&ctx.settings, &ctx.store, &CommandDataStore, CancelToken::detached(), "batch");
    let runs = pipeline.run_all(&apps);
    let report = RunReport::build(pipeline.run_id(), started, &apps, &runs, &ctx.settings.state_dir);

    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.successful, 2);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.applications[1].status, RunStatus::RolledBack);
    assert!(report.applications[0].last_deployed.is_some());
    assert!(report.applications[1].last_deployed.is_none());

    let path = report.write(&ctx.settings.report_dir).unwrap();
    assert!(path.starts_with(&ctx.settings.report_dir));
}

#[test]
fn local_source_with_links_redeploys() {
    let host = Host::new();
    let (root, source) = host.local_app("shop", "");
    std::os::unix::fs::symlink("routes/web.php", source.join("link.php")).unwrap();

    let first = host.deploy("shop");
    assert_eq!(first.status, RunStatus::Success, "{:?}", first.error);

    fs::write(source.join("routes/web.php"), "<?php // v2\n").unwrap();
    let second = host.deploy("shop");

    assert_eq!(second.status, RunStatus::Success, "{:?}", second.error);
    assert_eq!(
        fs::read_link(root.join("link.php")).unwrap(),
        std::path::Path::new("routes/web.php")
    );
    assert_eq!(fs::read_to_string(root.join("link.php")).unwrap(), "<?php // v2\n");
}

#[test]
fn local_source_deletions_reach_the_live_tree() {
    let host = Host::new();
    let (root, source) = host.local_app("shop", "");
    fs::write(source.join("routes/old.php"), "<?php // retired\n").unwrap();

    let first = host.deploy("shop");
    assert_eq!(first.status, RunStatus::Success, "{:?}", first.error);
    assert!(root.join("routes/old.php").is_file());
    fs::create_dir_all(root.join("vendor/laravel")).unwrap();

    fs::remove_file(source.join("routes/old.php")).unwrap();
    let second = host.deploy("shop");

    assert_eq!(second.status, RunStatus::Success, "{:?}", second.error);
    assert!(!root.join("routes/old.php").exists());
    assert!(root.join("routes/web.php").is_file());
    assert!(root.join(".env").is_file());
    assert!(root.join("vendor/laravel").is_dir());
}

#[test]
fn zero_downtime_first_deploy_failing_after_activation_leaves_nothing_live() {
    let host = Host::new();
    let root = host.zero_downtime_app("portal", "VERIFY_COMMAND=false\n");

    let run = host.deploy("portal");

    assert_eq!(run.status, RunStatus::RolledBack);
    assert_eq!(run.stage_results.last().unwrap().stage, StageKind::Verify);
    assert_eq!(release::current_release(&root), None);
    assert!(fs::symlink_metadata(root.join("current")).is_err());
    let app = host.resolve("portal");
    assert!(release::list_releases(&app).unwrap().is_empty());
}

#[test]
fn zero_downtime_failure_after_activation_restores_previous_release() {
    let host = Host::new();
    let root = host.zero_downtime_app("portal", "");

    let first = host.deploy("portal");
    assert_eq!(first.status, RunStatus::Success, "{:?}", first.error);
    let live = release::current_release(&root).unwrap();

    let source = host.path().join("src/portal");
    host.write_record(
        "portal",
        &root,
        &format!(
            "ZERO_DOWNTIME=true\nDEPLOY_METHOD=local\nSOURCE_PATH={}\nVERIFY_COMMAND=false\n",
            source.display()
        ),
    );
    fs::write(source.join("routes/web.php"), "<?php // v2\n").unwrap();

    let second = host.deploy("portal");

    assert_eq!(second.status, RunStatus::RolledBack);
    let failed = second.release_id.clone().unwrap();
    assert_ne!(failed, live);
    assert_eq!(release::current_release(&root).as_deref(), Some(live.as_str()));
    assert_eq!(
        fs::read_to_string(root.join("current/routes/web.php")).unwrap(),
        "<?php // v1\n"
    );
    let app = host.resolve("portal");
    let ids: Vec<String> = release::list_releases(&app)
        .unwrap()
        .into_iter()
        .map(|r| r.release_id)
        .collect();
    assert_eq!(ids, vec![live]);
}
