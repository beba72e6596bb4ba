//! Process configuration read from `DOCKYARD_*` environment variables.

use dockyard_common::{DockyardError, Result};
use dockyard_orchestrator::{BridgeConfig, QueuePolicy, DEFAULT_WORKERS};
use dockyard_runtime::DEFAULT_DOCKER_TIMEOUT;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://dockyard.db";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_IMAGES_DIR: &str = "./images";

#[derive(Debug, Clone, PartialEq)]
pub struct DockyardConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub queue: QueuePolicy,
    pub images_dir: PathBuf,
    pub docker_timeout: Duration,
}

impl Default for DockyardConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            workers: DEFAULT_WORKERS,
            queue: QueuePolicy::Unbounded,
            images_dir: PathBuf::from(DEFAULT_IMAGES_DIR),
            docker_timeout: DEFAULT_DOCKER_TIMEOUT,
        }
    }
}

impl DockyardConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from any key lookup. Unset or blank keys take their default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let workers = match get("DOCKYARD_WORKERS") {
            Some(raw) => parse::<usize>("DOCKYARD_WORKERS", &raw)?,
            None => defaults.workers,
        };
        if workers == 0 {
            return Err(DockyardError::Config(
                "DOCKYARD_WORKERS must be at least 1".to_string(),
            ));
        }

        let queue = match get("DOCKYARD_QUEUE_CAPACITY") {
            Some(raw) => QueuePolicy::Bounded(parse("DOCKYARD_QUEUE_CAPACITY", &raw)?),
            None => QueuePolicy::Unbounded,
        };

        let docker_timeout = match get("DOCKYARD_DOCKER_TIMEOUT_SECS") {
            Some(raw) => Duration::from_secs(parse("DOCKYARD_DOCKER_TIMEOUT_SECS", &raw)?),
            None => defaults.docker_timeout,
        };

        Ok(Self {
            database_url: get("DOCKYARD_DATABASE_URL").unwrap_or(defaults.database_url),
            host: get("DOCKYARD_HOST").unwrap_or(defaults.host),
            port: match get("DOCKYARD_PORT") {
                Some(raw) => parse("DOCKYARD_PORT", &raw)?,
                None => defaults.port,
            },
            workers,
            queue,
            images_dir: get("DOCKYARD_IMAGES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.images_dir),
            docker_timeout,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            workers: self.workers,
            queue: self.queue,
        }
    }
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| DockyardError::Config(format!("{key}={raw:?}: {e}")))
}
