pub mod explorer_config;

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::explorer_config::ExplorerConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub explorer: ExplorerConfig,
}

impl AppConfig {
    /// Loads the config from `path`, or from the default location.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let explorer = match path {
            Some(path) => ExplorerConfig::load_config(path).await?,
            None => match ExplorerConfig::default_path() {
                Some(path) => ExplorerConfig::load_config(&path).await?,
                None => ExplorerConfig::default(),
            },
        };
        Ok(Self { explorer })
    }
}
