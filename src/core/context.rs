//! Everything a command needs before it touches an application: the config
//! store, the parsed global record and the typed settings.

use std::path::Path;

use crate::backup::BackupManager;
use crate::config::{ConfigRecord, ConfigStore, Settings};
use crate::datastore::DataStore;
use crate::error::{Error, Result};
use crate::host;
use crate::paths;
use crate::registry::{Application, Registry};

#[derive(Debug)]
pub struct RunContext {
    pub store: ConfigStore,
    pub global: ConfigRecord,
    pub settings: Settings,
}

impl RunContext {
    /// Resolve the config directory and load the global record.
    pub fn load(config_dir: Option<&Path>) -> Result<Self> {
        let dir = paths::config_dir(config_dir)?;
        let store = ConfigStore::new(dir);
        let global = store.load_global()?;
        let settings = Settings::from_global(&global)?;
        tracing::debug!(config_dir = %store.dir().display(), "Loaded configuration");
        Ok(Self {
            store,
            global,
            settings,
        })
    }

    pub fn registry(&self) -> Registry<'_> {
        Registry::new(&self.store, &self.global, &self.settings)
    }

    pub fn backups<'a>(&'a self, datastore: &'a dyn DataStore) -> BackupManager<'a> {
        BackupManager::new(&self.settings, datastore)
    }

    /// Commands that mutate applications refuse to run unprivileged unless
    /// `REQUIRE_ROOT=false`.
    pub fn require_privilege(&self) -> Result<()> {
        if self.settings.require_root {
            host::require_root()?;
        }
        Ok(())
    }

    /// One named application, or every application under `APPS_ROOT`.
    /// An empty scan is a precondition failure.
    pub fn applications(&self, name: Option<&str>) -> Result<Vec<Application>> {
        let registry = self.registry();
        if let Some(name) = name {
            return Ok(vec![registry.resolve(name)?]);
        }

        let apps = registry.scan()?;
        if apps.is_empty() {
            return Err(Error::run_no_applications(
                self.settings.apps_root.display().to_string(),
            ));
        }
        Ok(apps)
    }
}
