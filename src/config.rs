use std::{fs, path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;
use url::Url;

use crate::auth::{KeyringTokenProvider, StaticTokenProvider, TokenProvider};
use crate::client::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT, GraphClient};
use crate::retry::{DEFAULT_MAX_RETRIES, RetryPolicy};

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    base_url: Option<Url>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    default_account: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigEnv {
    graph_base_url: Option<Url>,
    graph_timeout_secs: Option<u64>,
    graph_max_retries: Option<u32>,
    graph_account_id: Option<String>,
    graph_access_token: Option<String>,
}

pub struct Config {
    pub base_url: Url,
    pub timeout: Duration,
    pub max_retries: u32,
    pub default_account: Option<String>,
    access_token: Option<String>,
}

fn merge_config(base: ConfigFile, override_config: ConfigEnv) -> Result<Config> {
    let base_url = match override_config.graph_base_url.or(base.base_url) {
        Some(url) => url,
        None => Url::parse(DEFAULT_BASE_URL)?,
    };

    let timeout = override_config
        .graph_timeout_secs
        .or(base.timeout_secs)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TIMEOUT);

    let max_retries = override_config
        .graph_max_retries
        .or(base.max_retries)
        .unwrap_or(DEFAULT_MAX_RETRIES);

    let default_account = override_config.graph_account_id.or(base.default_account);

    Ok(Config {
        base_url,
        timeout,
        max_retries,
        default_account,
        access_token: override_config.graph_access_token,
    })
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    match fs::read_to_string(path) {
        Ok(contents) => toml::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display())),
        Err(_) => Ok(ConfigFile::default()),
    }
}

pub fn read_config() -> Result<Config> {
    let _ = dotenv();
    let env_config = envy::from_env::<ConfigEnv>().unwrap_or_default();

    let project_dirs = directories::ProjectDirs::from("com", "graphreq", "graphreq")
        .ok_or(anyhow!("Unable to determine home directory"))?;
    let file_config = read_config_file(&project_dirs.config_dir().join("config.toml"))?;

    merge_config(file_config, env_config)
}

impl Config {
    /// A token from the environment wins; otherwise tokens come from the OS keyring.
    pub fn token_provider(&self) -> Arc<dyn TokenProvider> {
        match &self.access_token {
            Some(token) => Arc::new(StaticTokenProvider::new(token.clone())),
            None => Arc::new(KeyringTokenProvider::default()),
        }
    }

    pub fn graph_client(&self) -> Result<GraphClient> {
        let client = GraphClient::with_timeout(&self.base_url, self.token_provider(), self.timeout)
            .context("Failed to build HTTP client")?;
        Ok(client.with_retry_policy(RetryPolicy::default().with_max_retries(self.max_retries)))
    }
}
