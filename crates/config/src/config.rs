//! Configuration files.

use eyre::WrapErr;
use les_network_types::{DistributorConfig, PoolConfig, RetrievalConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration of the retrieval stack.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct Config {
    /// Configuration of the candidate pool.
    pub peers: PoolConfig,
    /// Configuration of the request distributor.
    pub distributor: DistributorConfig,
    /// Configuration of the retrieval manager.
    pub retrieval: RetrievalConfig,
}

impl Config {
    /// Loads the config from `path`.
    ///
    /// A missing file is created with the default config.
    pub fn from_path(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        confy::load_path(path).wrap_err_with(|| format!("Could not load config file {path:?}"))
    }

    /// Writes the config to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> eyre::Result<()> {
        let path = path.as_ref();
        confy::store_path(path, self)
            .wrap_err_with(|| format!("Could not store config file {path:?}"))
    }
}
