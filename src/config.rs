//! Defines the configuration settings for the employee-import application.

use anyhow::Context;
use clap::{Args, ValueEnum};
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["./employee-import.toml", "./config.toml"];

/// Where accepted employees are persisted.
#[derive(ValueEnum, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum StorageBackend {
    /// Process-local, lost on restart.
    Memory,
    /// SQLite database file.
    Sqlite,
}

/// Configuration overrides accepted on the command line or via environment.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct ConfigArgs {
    /// Path to configuration file (TOML format)
    #[arg(long, env = "EMPLOYEE_IMPORT_CONFIG")]
    pub config_file: Option<String>,

    /// Address to bind the HTTP server to
    #[arg(long, env = "EMPLOYEE_IMPORT_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "EMPLOYEE_IMPORT_PORT")]
    pub port: Option<u16>,

    /// Storage backend
    #[arg(long, value_enum, env = "EMPLOYEE_IMPORT_BACKEND")]
    pub backend: Option<StorageBackend>,

    /// SQLite database file (":memory:" for a throwaway database)
    #[arg(long, env = "EMPLOYEE_IMPORT_DATABASE_PATH")]
    pub database_path: Option<String>,

    /// Maximum number of imports processed at once
    #[arg(long, env = "EMPLOYEE_IMPORT_MAX_CONCURRENCY")]
    pub max_concurrency: Option<usize>,

    /// Maximum accepted request body size in bytes
    #[arg(long, env = "EMPLOYEE_IMPORT_MAX_BODY_BYTES")]
    pub max_body_bytes: Option<u64>,

    /// Page size used when a listing request omits pageSize
    #[arg(long, env = "EMPLOYEE_IMPORT_DEFAULT_PAGE_SIZE")]
    pub default_page_size: Option<u32>,
}

/// TOML Configuration file structure
#[derive(Deserialize, Debug, Default)]
struct ConfigFile {
    server: Option<ServerConfig>,
    storage: Option<StorageConfig>,
    query: Option<QueryConfig>,
}

#[derive(Deserialize, Debug, Default)]
struct ServerConfig {
    host: Option<String>,
    port: Option<u16>,
    max_concurrency: Option<usize>,
    max_body_bytes: Option<u64>,
}

#[derive(Deserialize, Debug, Default)]
struct StorageConfig {
    backend: Option<StorageBackend>,
    database_path: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct QueryConfig {
    default_page_size: Option<u32>,
}

/// Application configuration settings.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    /// Address the HTTP server binds to.
    pub host: String,
    /// Port the HTTP server listens on.
    pub port: u16,
    /// Maximum number of import requests processed concurrently.
    pub max_concurrency: usize,
    /// Requests with a larger body are rejected before parsing.
    pub max_body_bytes: u64,
    pub storage_backend: StorageBackend,
    /// SQLite database file, used only with the SQLite backend.
    pub database_path: String,
    /// Page size applied when a listing request omits one.
    pub default_page_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_concurrency: 10,
            max_body_bytes: 10 * 1024 * 1024,
            storage_backend: StorageBackend::Memory,
            database_path: "employees.db".to_string(),
            default_page_size: 10,
        }
    }
}

impl Config {
    /// Socket address for the HTTP server; `host` has been validated by `build_config`.
    pub(crate) fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Load configuration from a TOML file
fn load_config_file(file_path: &str) -> anyhow::Result<ConfigFile> {
    let path = Path::new(file_path);
    if !path.exists() {
        tracing::warn!("Configuration file {} not found, using defaults", file_path);
        return Ok(ConfigFile::default());
    }

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read configuration file: {}", file_path))?;

    parse_config_file(&content)
        .with_context(|| format!("Failed to parse TOML configuration from {}", file_path))
}

fn parse_config_file(content: &str) -> anyhow::Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    Ok(config)
}

fn apply_file_config(config: &mut Config, file_config: &ConfigFile) {
    if let Some(server) = &file_config.server {
        if let Some(host) = &server.host {
            config.host = host.clone();
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(concurrency) = server.max_concurrency {
            config.max_concurrency = concurrency;
        }
        if let Some(limit) = server.max_body_bytes {
            config.max_body_bytes = limit;
        }
    }

    if let Some(storage) = &file_config.storage {
        if let Some(backend) = storage.backend {
            config.storage_backend = backend;
        }
        if let Some(path) = &storage.database_path {
            config.database_path = path.clone();
        }
    }

    if let Some(query) = &file_config.query {
        if let Some(page_size) = query.default_page_size {
            config.default_page_size = page_size;
        }
    }
}

/// Apply command line arguments to the Config instance
fn apply_cli_args(config: &mut Config, args: &ConfigArgs) {
    if let Some(ref host) = args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(backend) = args.backend {
        config.storage_backend = backend;
    }
    if let Some(ref path) = args.database_path {
        config.database_path = path.clone();
    }
    if let Some(concurrency) = args.max_concurrency {
        config.max_concurrency = concurrency;
    }
    if let Some(limit) = args.max_body_bytes {
        config.max_body_bytes = limit;
    }
    if let Some(page_size) = args.default_page_size {
        config.default_page_size = page_size;
    }
}

fn validate_config(config: &mut Config) -> anyhow::Result<()> {
    config
        .host
        .parse::<IpAddr>()
        .with_context(|| format!("Invalid bind address: {}", config.host))?;

    if config.max_concurrency == 0 {
        config.max_concurrency = 1;
        tracing::warn!("Concurrency was set to 0. Setting to 1.");
    }

    if config.default_page_size == 0 {
        config.default_page_size = 10;
        tracing::warn!("Default page size was set to 0. Setting to 10.");
    }

    if config.max_body_bytes == 0 {
        config.max_body_bytes = Config::default().max_body_bytes;
        tracing::warn!(
            "Body size limit was set to 0. Setting to {} bytes.",
            config.max_body_bytes
        );
    }

    if config.database_path.trim().is_empty() {
        config.database_path = Config::default().database_path;
        tracing::warn!(
            "Database path was empty. Setting to {}.",
            config.database_path
        );
    }

    Ok(())
}

pub(crate) fn build_config(args: &ConfigArgs) -> anyhow::Result<Config> {
    let mut config = Config::default();

    if let Some(ref file_path) = args.config_file {
        let file_config = load_config_file(file_path)?;
        apply_file_config(&mut config, &file_config);
    } else {
        for path in DEFAULT_CONFIG_PATHS.iter() {
            if Path::new(path).exists() {
                match load_config_file(path) {
                    Ok(file_config) => {
                        apply_file_config(&mut config, &file_config);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load configuration from {}: {}", path, e);
                    }
                }
            }
        }
    }

    apply_cli_args(&mut config, args);

    validate_config(&mut config)?;

    tracing::debug!("Final configuration: {:?}", config);

    Ok(config)
}
