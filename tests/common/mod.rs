#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use shipyard::context::RunContext;
use shipyard::datastore::CommandDataStore;
use shipyard::interrupt::CancelToken;
use shipyard::pipeline::{Pipeline, PipelineRun};
use shipyard::registry::Application;

/// A throwaway host: config dir, apps root, backup root, state and report
/// dirs under one temp directory. The data store is a plain file, `db.sql`,
/// driven by `cat`.
pub struct Host {
    pub dir: tempfile::TempDir,
}

impl Host {
    pub fn new() -> Self {
        Self::with_global("")
    }

    pub fn with_global(extra: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        for sub in ["www", "backups", "reports", "state", "conf/apps", "src"] {
            fs::create_dir_all(base.join(sub)).unwrap();
        }
        let db = base.join("db.sql");
        fs::write(&db, "rows: 1\n").unwrap();

        let global = format!(
            "APPS_ROOT={base}/www\nBACKUP_ROOT={base}/backups\nREPORT_DIR={base}/reports\nSTATE_DIR={base}/state\n\
DOMAIN_SUFFIX=test\nREQUIRE_ROOT=false\nSTAGE_TIMEOUT=30\nREQUIRED_TOOLS=sh\n\
DB_DUMP_COMMAND=\"cat {db}\"\nDB_RESTORE_COMMAND=\"cat > {db}\"\n\
DB_PROVISION_COMMAND=\"test -f {db}\"\nDB_OPTIMIZE_COMMAND=\"test -f {db}\"\n\
CODE_UPDATE_COMMAND=true\nDEPENDENCY_COMMAND=true\nMIGRATE_COMMAND=true\nASSET_COMMAND=\n\
OPTIMIZE_COMMAND=true\nRELOAD_COMMAND=true\nQUEUE_COMMAND=true\nSCHEDULER_COMMAND=true\n\
VERIFY_COMMAND=true\nSSL_COMMAND=true\n{extra}",
            base = base.display(),
            db = db.display(),
            extra = extra,
        );
        fs::write(base.join("conf/global.conf"), global).unwrap();
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_dir(&self) -> PathBuf {
        self.path().join("conf")
    }

    pub fn db_file(&self) -> PathBuf {
        self.path().join("db.sql")
    }

    pub fn context(&self) -> RunContext {
        RunContext::load(Some(&self.config_dir())).unwrap()
    }

    /// A framework application tree under `APPS_ROOT` with an explicit record.
    pub fn classic_app(&self, name: &str, record_lines: &str) -> PathBuf {
        let root = self.path().join("www").join(name);
        write_laravel_tree(&root);
        self.write_record(name, &root, record_lines);
        root
    }

    /// A zero-downtime application whose code is copied from `src/<name>`.
    pub fn zero_downtime_app(&self, name: &str, record_lines: &str) -> PathBuf {
        let source = self.path().join("src").join(name);
        write_laravel_tree(&source);
        let root = self.path().join("www").join(name);
        fs::create_dir_all(&root).unwrap();
        self.write_record(
            name,
            &root,
            &format!(
                "ZERO_DOWNTIME=true\nDEPLOY_METHOD=local\nSOURCE_PATH={}\n{}",
                source.display(),
                record_lines
            ),
        );
        root
    }

    /// A classic application whose code is synced from `src/<name>` on
    /// every deploy. Returns `(root, source)`.
    pub fn local_app(&self, name: &str, record_lines: &str) -> (PathBuf, PathBuf) {
        let source = self.path().join("src").join(name);
        write_laravel_tree(&source);
        let root = self.path().join("www").join(name);
        fs::create_dir_all(&root).unwrap();
        self.write_record(
            name,
            &root,
            &format!(
                "DEPLOY_METHOD=local\nSOURCE_PATH={}\n{}",
                source.display(),
                record_lines
            ),
        );
        (root, source)
    }

    pub fn write_record(&self, name: &str, root: &Path, lines: &str) {
        fs::write(
            self.config_dir().join("apps").join(format!("{}.conf", name)),
            format!(
                "APP_NAME={name}\nAPP_PATH={}\nDOMAIN={name}.test\nDB_NAME={name}\nDB_USER={name}\nDB_PASSWORD=secret\n{lines}",
                root.display()
            ),
        )
        .unwrap();
    }

    pub fn resolve(&self, name: &str) -> Application {
        self.context().registry().resolve(name).unwrap()
    }

    pub fn deploy(&self, name: &str) -> PipelineRun {
        let ctx = self.context();
        let app = ctx.registry().resolve(name).unwrap();
        let datastore = CommandDataStore;
        Pipeline::new(&ctx.settings, &ctx.store, &datastore, CancelToken::detached(), "test-run").run(&app)
    }
}

pub fn write_laravel_tree(root: &Path) {
    fs::create_dir_all(root.join("routes")).unwrap();
    fs::write(root.join("artisan"), "#!/usr/bin/env php\n").unwrap();
    fs::write(
        root.join("composer.json"),
        r#"{"require": {"php": "^8.2", "laravel/framework": "^11.0"}}"#,
    )
    .unwrap();
    fs::write(root.join("routes/web.php"), "<?php // v1\n").unwrap();
}
