use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::{OutteConfig, OutteError, OutteResult, OutteStore};

const DB_FILE: &str = "outte.sqlite";
const DEMO_DIR: &str = "demos";

/// On-disk layout of one outte data directory: `outte.json`, the default
/// sqlite database and decoded demo exports under `demos/`.
#[derive(Clone, Debug)]
pub struct Datastore {
    root: PathBuf,
}

impl Datastore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn default_sqlite_path(&self) -> PathBuf {
        self.root.join(DB_FILE)
    }

    pub fn demo_dir(&self) -> PathBuf {
        self.root.join(DEMO_DIR)
    }

    /// Where `export_demo` writes an archive's frames when no path is given.
    pub fn demo_path(&self, archive_id: i64) -> PathBuf {
        self.demo_dir().join(format!("{archive_id}.json"))
    }

    pub fn load_config(&self) -> OutteResult<OutteConfig> {
        OutteConfig::load_or_init(&self.root, &self.default_sqlite_path())
    }

    pub async fn open(&self) -> OutteResult<(OutteConfig, OutteStore)> {
        let config = self.load_config()?;
        let store = OutteStore::connect(&config, &self.root).await?;
        Ok((config, store))
    }

    /// Writes decoded sublevel frames as a JSON array of byte arrays.
    pub fn export_demo(
        &self,
        archive_id: i64,
        sublevels: &[Vec<u8>],
        out: Option<&Path>,
    ) -> OutteResult<PathBuf> {
        let path = match out {
            Some(path) => path.to_path_buf(),
            None => {
                fs::create_dir_all(self.demo_dir())
                    .map_err(|err| OutteError::storage(format!("create demo dir: {err}")))?;
                self.demo_path(archive_id)
            }
        };
        let json = serde_json::to_string(sublevels)
            .map_err(|err| OutteError::storage(format!("serialize demo {archive_id}: {err}")))?;
        fs::write(&path, json)
            .map_err(|err| OutteError::storage(format!("write {}: {err}", path.display())))?;
        info!("exported demo {archive_id} to {}", path.display());
        Ok(path)
    }
}
