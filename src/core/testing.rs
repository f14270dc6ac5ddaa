//! Scratch host for unit tests: a temp directory holding the config dir,
//! apps root, backup root and state dir, with every command template set to
//! something that runs without PHP or MySQL installed.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{ConfigRecord, ConfigStore, KeyScope, Settings};
use crate::paths;
use crate::registry::{Application, Registry};

pub fn laravel_app(dir: &Path, php: Option<&str>) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("artisan"), "#!/usr/bin/env php\n").unwrap();
    let php = php
        .map(|v| format!("\"php\": \"{}\", ", v))
        .unwrap_or_default();
    fs::write(
        dir.join("composer.json"),
        format!("{{\"require\": {{{}\"laravel/framework\": \"^11.0\"}}}}", php),
    )
    .unwrap();
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub store: ConfigStore,
    pub global: ConfigRecord,
    pub settings: Settings,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_global("")
    }

    pub fn with_global(extra: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        for sub in ["www", "backups", "reports", "state", "conf"] {
            fs::create_dir_all(base.join(sub)).unwrap();
        }
        let db = base.join("db.sql");
        let content = format!(
            "APPS_ROOT={www}\nBACKUP_ROOT={backups}\nREPORT_DIR={reports}\nSTATE_DIR={state}\n\
DOMAIN_SUFFIX=test\nREQUIRE_ROOT=false\nSTAGE_TIMEOUT=60\n\
DB_DUMP_COMMAND=\"cat {db}\"\nDB_RESTORE_COMMAND=\"cat > {db}\"\n\
DB_PROVISION_COMMAND=\"touch {db}\"\nDB_OPTIMIZE_COMMAND=\"test -f {db}\"\n\
CODE_UPDATE_COMMAND=true\nDEPENDENCY_COMMAND=true\nMIGRATE_COMMAND=true\nASSET_COMMAND=\n\
OPTIMIZE_COMMAND=true\nRELOAD_COMMAND=true\nQUEUE_COMMAND=true\nSCHEDULER_COMMAND=true\n\
VERIFY_COMMAND=true\nSSL_COMMAND=true\n{extra}",
            www = base.join("www").display(),
            backups = base.join("backups").display(),
            reports = base.join("reports").display(),
            state = base.join("state").display(),
            db = db.display(),
            extra = extra,
        );
        let global_path = paths::global_config(&base.join("conf"));
        fs::write(&global_path, &content).unwrap();
        let global = ConfigRecord::parse(&content, global_path, KeyScope::Global).unwrap();
        let settings = Settings::from_global(&global).unwrap();

        Self {
            store: ConfigStore::new(base.join("conf")),
            dir,
            global,
            settings,
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn db_file(&self) -> PathBuf {
        self.dir.path().join("db.sql")
    }

    pub fn registry(&self) -> Registry<'_> {
        Registry::new(&self.store, &self.global, &self.settings)
    }

    /// A classic application with a record holding `record_lines`.
    pub fn app(&self, name: &str, record_lines: &str) -> Application {
        let root = self.settings.apps_root.join(name);
        laravel_app(&root, None);
        self.write_record(name, &root, record_lines);
        self.registry().resolve(name).unwrap()
    }

    /// A zero-downtime application deployed from a local source tree.
    pub fn zero_downtime_app(&self, name: &str, record_lines: &str) -> Application {
        let root = self.settings.apps_root.join(name);
        let source = self.dir.path().join("src").join(name);
        laravel_app(&source, None);
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
        let app = self.registry().resolve(name).unwrap();
        crate::release::ensure_layout(&app.root_path).unwrap();
        app
    }

    fn write_record(&self, name: &str, root: &Path, lines: &str) {
        let path = paths::app_config(self.store.dir(), name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            format!(
                "APP_NAME={name}\nAPP_PATH={}\nDOMAIN={name}.test\nDB_NAME={name}\nDB_USER={name}\nDB_PASSWORD=secret\n{lines}",
                root.display()
            ),
        )
        .unwrap();
    }
}
