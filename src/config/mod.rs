//! Environment-backed configuration.

use crate::di::{Injectable, Resolver};
use crate::error::{BunstoneError, Result};
use dashmap::DashMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

pub const VIEWS_DIR: &str = "BUNSTONE_VIEWS_DIR";
pub const PUBLIC_DIR: &str = "BUNSTONE_PUBLIC_DIR";
pub const SCRATCH_DIR: &str = "BUNSTONE_SCRATCH_DIR";
pub const BUNDLER: &str = "BUNSTONE_BUNDLER";
pub const BODY_LIMIT: &str = "BUNSTONE_BODY_LIMIT";
pub const HOST: &str = "HOST";
pub const PORT: &str = "PORT";

/// Configuration service
///
/// Starts from the process environment; values can be overridden with
/// [`ConfigService::set`]. Injectable, so providers can depend on it.
#[derive(Clone, Default)]
pub struct ConfigService {
    config: Arc<DashMap<String, String>>,
}

impl ConfigService {
    pub fn new() -> Self {
        Self::from_vars(env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let service = Self::default();
        for (key, value) in vars {
            service.config.insert(key.into(), value.into());
        }
        service
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.config.get(key).map(|v| v.clone())
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Parse a value, failing with a configuration error that names the key.
    pub fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
                BunstoneError::configuration(
                    format!("{key} has an invalid value: {raw}"),
                    format!("Set {key} to a valid {}.", std::any::type_name::<T>()),
                )
            }),
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        self.config.insert(key.to_string(), value.to_string());
    }
}

impl Injectable for ConfigService {
    fn inject(_: &Resolver<'_>) -> Result<Self> {
        Ok(Self::new())
    }
}

/// Application-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppOptions {
    /// Where view sources live. Hydration bundling is skipped when unset.
    pub views_dir: Option<PathBuf>,
    /// Served at `/public`; view bundles are written here.
    pub public_dir: PathBuf,
    /// Generated hydration entries.
    pub scratch_dir: PathBuf,
    pub bundler: String,
    pub body_limit: usize,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            views_dir: None,
            public_dir: PathBuf::from("public"),
            scratch_dir: PathBuf::from(".bunstone"),
            bundler: "esbuild".to_string(),
            body_limit: 2 * 1024 * 1024,
        }
    }
}

impl AppOptions {
    pub fn from_config(config: &ConfigService) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            views_dir: config.get(VIEWS_DIR).map(PathBuf::from),
            public_dir: config
                .get(PUBLIC_DIR)
                .map_or(defaults.public_dir, PathBuf::from),
            scratch_dir: config
                .get(SCRATCH_DIR)
                .map_or(defaults.scratch_dir, PathBuf::from),
            bundler: config.get(BUNDLER).unwrap_or(defaults.bundler),
            body_limit: config.parse(BODY_LIMIT)?.unwrap_or(defaults.body_limit),
        })
    }

    pub fn views_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.views_dir = Some(dir.into());
        self
    }

    pub fn public_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.public_dir = dir.into();
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }
}

/// `HOST`/`PORT`, defaulting to `0.0.0.0:3000`.
pub fn listen_addr(config: &ConfigService) -> Result<SocketAddr> {
    let host = config.get_or(HOST, "0.0.0.0");
    let port: u16 = config.parse(PORT)?.unwrap_or(3000);
    format!("{host}:{port}").parse().map_err(|_| {
        BunstoneError::configuration(
            format!("{host}:{port} is not a valid listen address"),
            "Set HOST to an IP address.",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_config() {
        let config = ConfigService::from_vars([
            (VIEWS_DIR, "src/views"),
            (BODY_LIMIT, "1024"),
            (PORT, "8080"),
        ]);
        let options = AppOptions::from_config(&config).unwrap();
        assert_eq!(options.views_dir, Some(PathBuf::from("src/views")));
        assert_eq!(options.public_dir, PathBuf::from("public"));
        assert_eq!(options.body_limit, 1024);
        assert_eq!(listen_addr(&config).unwrap().port(), 8080);
    }

    #[test]
    fn test_invalid_value_names_the_key() {
        let config = ConfigService::from_vars([(BODY_LIMIT, "lots")]);
        let err = AppOptions::from_config(&config).unwrap_err();
        assert_eq!(err.code(), "BNS-CFG-001");
        assert!(err.to_string().contains(BODY_LIMIT));
    }
}
