pub mod config;
pub mod datastore;
mod db;
pub mod migration;
pub mod store;

pub use config::{DatabaseConfig, FetchConfig, OutteConfig, PoolConfig, WorkersConfig};
pub use datastore::Datastore;
pub use outte_core::*;
pub use store::{HISTORY_RANKS, OutteStore};
