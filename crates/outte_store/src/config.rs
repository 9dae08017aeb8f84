use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use outte_core::{BoardType, FilterConfig, OutteError, OutteResult, RankingConfig};

const DEFAULT_CONFIG_NAME: &str = "outte.json";
const DEFAULT_DB_FILE: &str = "outte.sqlite";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Postgres { url: String },
    Mysql { url: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

/// Upstream server access.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    pub base_url: String,
    /// Requester identities rotated through when the server refuses one.
    #[serde(default)]
    pub identities: Vec<u64>,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub board_attempts: u32,
    pub replay_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            base_url: "https://dojo.nplusplus.ninja/prod/steam".to_string(),
            identities: Vec::new(),
            timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            board_attempts: 5,
            replay_attempts: 5,
            backoff_base_ms: 250,
            backoff_max_ms: 30_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkersConfig {
    pub board_types: Vec<BoardType>,
    pub board_interval_secs: u64,
    pub demo_interval_secs: u64,
    pub demo_batch: u32,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            board_types: BoardType::ALL.to_vec(),
            board_interval_secs: 86_400,
            demo_interval_secs: 600,
            demo_batch: 200,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutteConfig {
    pub database: DatabaseConfig,
    pub pool: Option<PoolConfig>,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub ranking: RankingConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
}

impl OutteConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            pool: None,
            filter: FilterConfig::legacy(),
            ranking: RankingConfig::default(),
            fetch: FetchConfig::default(),
            workers: WorkersConfig::default(),
        }
    }

    pub fn load_or_init(base_dir: &Path, default_sqlite_path: &Path) -> OutteResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| OutteError::storage(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| OutteError::storage(format!("read config: {err}")))?;
            let config: OutteConfig = serde_json::from_str(&raw)
                .map_err(|err| OutteError::configuration(err.to_string()))?;
            return Ok(config);
        }
        let default = OutteConfig::default_sqlite(default_sqlite_path.to_string_lossy());
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| OutteError::storage(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| OutteError::storage(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> OutteResult<PathBuf> {
        match &self.database {
            DatabaseConfig::Sqlite { path } => {
                let candidate =
                    PathBuf::from(path.clone().unwrap_or_else(|| DEFAULT_DB_FILE.to_string()));
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            _ => Err(OutteError::configuration("config is not sqlite backend")),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
            DatabaseConfig::Mysql { .. } => "mysql",
        }
    }

    pub fn connection_url(&self, base_dir: &Path) -> OutteResult<String> {
        match &self.database {
            DatabaseConfig::Sqlite { .. } => {
                let path = self.sqlite_path(base_dir)?;
                Ok(format!("sqlite://{}?mode=rwc", path.display()))
            }
            DatabaseConfig::Postgres { url } | DatabaseConfig::Mysql { url } => Ok(url.clone()),
        }
    }
}
