//! Configuration loading
//!
//! Every setting resolves in priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! The config file is looked up at `<config dir>/acestep-studio/config.toml`,
//! then `./acestep-studio.toml`, unless `--config` points somewhere explicit.

use clap::Parser;
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8888;
const DEFAULT_ACE_URL: &str = "http://localhost:8001";
const DEFAULT_ACE_PORT: u16 = 8001;
const DEFAULT_LLM_URL: &str = "http://localhost:11434/v1";
const DEFAULT_LLM_PORT: u16 = 11434;
const DEFAULT_LLM_MODEL: &str = "gemma3:latest";
const DEFAULT_POLL_INTERVAL_SECS: f64 = 1.0;
const DEFAULT_POLL_TIMEOUT_SECS: f64 = 300.0;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid {field} URL '{url}': {message}")]
    InvalidUrl {
        field: &'static str,
        url: String,
        message: String,
    },

    #[error("Failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Command-line arguments
#[derive(Debug, Default, Parser)]
#[command(name = "acestep-studio", version, about = "ACE-Step 1.5 music generation web app")]
pub struct Args {
    /// Server bind host
    #[arg(long, env = "ACESTEP_STUDIO_HOST")]
    pub host: Option<String>,

    /// Server bind port
    #[arg(long, env = "ACESTEP_STUDIO_PORT")]
    pub port: Option<u16>,

    /// ACE-Step API URL (e.g. http://YOUR_ACE_HOST:8001)
    #[arg(long = "ace-url", env = "ACE_STEP_API_URL")]
    pub ace_url: Option<String>,

    /// ACE-Step API host (keeps the current port)
    #[arg(long = "ace-host")]
    pub ace_host: Option<String>,

    /// ACE-Step API port (keeps the current host)
    #[arg(long = "ace-port")]
    pub ace_port: Option<u16>,

    /// ACE-Step API key (optional)
    #[arg(long = "ace-api-key", env = "ACE_STEP_API_KEY", hide_env_values = true)]
    pub ace_api_key: Option<String>,

    /// LLM API URL (OpenAI-compatible, e.g. http://YOUR_LLM_HOST:11434/v1)
    #[arg(long = "llm-url", env = "OPENAI_BASE_URL")]
    pub llm_url: Option<String>,

    /// LLM API host (keeps the current port and path)
    #[arg(long = "llm-host")]
    pub llm_host: Option<String>,

    /// LLM API port (keeps the current host and path)
    #[arg(long = "llm-port")]
    pub llm_port: Option<u16>,

    /// LLM chat model name
    #[arg(long = "llm-model", env = "OPENAI_CHAT_MODEL")]
    pub llm_model: Option<String>,

    /// LLM API key (optional; omitted for local endpoints like Ollama)
    #[arg(long = "llm-api-key", env = "OPENAI_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Explicit config file path
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Optional overrides read from the TOML config file
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    ace_step_api_url: Option<String>,
    ace_step_api_key: Option<String>,
    openai_base_url: Option<String>,
    openai_api_key: Option<String>,
    openai_chat_model: Option<String>,
    poll_interval_secs: Option<f64>,
    poll_timeout_secs: Option<f64>,
}

/// Resolved application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// ACE-Step API base URL, no trailing slash
    pub ace_step_api_url: String,
    pub ace_step_api_key: Option<String>,
    /// OpenAI-compatible chat API base URL, no trailing slash
    pub openai_base_url: String,
    pub openai_api_key: Option<String>,
    pub openai_chat_model: String,
    /// Seconds between task status polls
    pub poll_interval_secs: f64,
    /// Maximum seconds to wait for a generation task
    pub poll_timeout_secs: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            ace_step_api_url: DEFAULT_ACE_URL.to_string(),
            ace_step_api_key: None,
            openai_base_url: DEFAULT_LLM_URL.to_string(),
            openai_api_key: None,
            openai_chat_model: DEFAULT_LLM_MODEL.to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            poll_timeout_secs: DEFAULT_POLL_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Resolve configuration from parsed CLI arguments (which already carry
    /// any environment variable values via clap's `env` support)
    pub fn resolve(args: Args) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(file) = load_file_config(args.config.as_deref())? {
            config.apply_file(file);
        }
        config.apply_args(args)?;

        Ok(config)
    }

    /// Bind address for the HTTP listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(host) = file.host {
            self.host = host;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(url) = file.ace_step_api_url {
            self.ace_step_api_url = trim_base_url(&url);
        }
        if file.ace_step_api_key.is_some() {
            self.ace_step_api_key = file.ace_step_api_key;
        }
        if let Some(url) = file.openai_base_url {
            self.openai_base_url = trim_base_url(&url);
        }
        if file.openai_api_key.is_some() {
            self.openai_api_key = file.openai_api_key;
        }
        if let Some(model) = file.openai_chat_model {
            self.openai_chat_model = model;
        }
        if let Some(secs) = file.poll_interval_secs {
            self.poll_interval_secs = secs;
        }
        if let Some(secs) = file.poll_timeout_secs {
            self.poll_timeout_secs = secs;
        }
    }

    fn apply_args(&mut self, args: Args) -> Result<(), ConfigError> {
        if let Some(host) = args.host {
            self.host = host;
        }
        if let Some(port) = args.port {
            self.port = port;
        }

        if let Some(url) = args.ace_url {
            self.ace_step_api_url = trim_base_url(&url);
        } else if args.ace_host.is_some() || args.ace_port.is_some() {
            self.ace_step_api_url = rewrite_host_port(
                &self.ace_step_api_url,
                args.ace_host.as_deref(),
                args.ace_port,
                DEFAULT_ACE_PORT,
                "ace-step",
            )?;
        }
        if args.ace_api_key.is_some() {
            self.ace_step_api_key = args.ace_api_key;
        }

        if let Some(url) = args.llm_url {
            self.openai_base_url = normalize_llm_url(&url)?;
        } else if args.llm_host.is_some() || args.llm_port.is_some() {
            self.openai_base_url = rewrite_host_port(
                &self.openai_base_url,
                args.llm_host.as_deref(),
                args.llm_port,
                DEFAULT_LLM_PORT,
                "llm",
            )?;
        }
        if let Some(model) = args.llm_model {
            self.openai_chat_model = model;
        }
        if args.llm_api_key.is_some() {
            self.openai_api_key = args.llm_api_key;
        }

        Ok(())
    }
}

/// Load the TOML config file, if one exists.
///
/// An explicitly given path must be readable; a discovered path is optional.
fn load_file_config(explicit: Option<&Path>) -> Result<Option<FileConfig>, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match discover_config_file() {
            Some(path) => path,
            None => return Ok(None),
        },
    };

    let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
        path: path.clone(),
        source,
    })?;
    let file = toml::from_str(&content).map_err(|source| ConfigError::ParseFile {
        path: path.clone(),
        source,
    })?;

    tracing::info!("Loaded config file: {}", path.display());
    Ok(Some(file))
}

fn discover_config_file() -> Option<PathBuf> {
    if let Some(dir) = dirs::config_dir() {
        let path = dir.join("acestep-studio").join("config.toml");
        if path.is_file() {
            return Some(path);
        }
    }
    let local = PathBuf::from("acestep-studio.toml");
    if local.is_file() {
        return Some(local);
    }
    None
}

/// Base URLs are stored without a trailing slash so endpoint paths can be
/// appended with plain formatting
fn trim_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

/// Replace only the host and/or port of an existing base URL
fn rewrite_host_port(
    current: &str,
    host: Option<&str>,
    port: Option<u16>,
    default_port: u16,
    field: &'static str,
) -> Result<String, ConfigError> {
    let mut url = Url::parse(current).map_err(|e| ConfigError::InvalidUrl {
        field,
        url: current.to_string(),
        message: e.to_string(),
    })?;

    let host = host
        .map(str::to_string)
        .or_else(|| url.host_str().map(str::to_string))
        .unwrap_or_else(|| "localhost".to_string());
    let port = port.or_else(|| url.port()).unwrap_or(default_port);

    url.set_host(Some(&host))
        .map_err(|e| ConfigError::InvalidUrl {
            field,
            url: current.to_string(),
            message: e.to_string(),
        })?;
    url.set_port(Some(port)).map_err(|_| ConfigError::InvalidUrl {
        field,
        url: current.to_string(),
        message: "cannot set port".to_string(),
    })?;

    Ok(trim_base_url(url.as_str()))
}

/// An LLM URL given without a path gets the OpenAI-compatible `/v1` prefix
fn normalize_llm_url(raw: &str) -> Result<String, ConfigError> {
    let mut url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        field: "llm",
        url: raw.to_string(),
        message: e.to_string(),
    })?;

    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/v1");
    }

    Ok(trim_base_url(url.as_str()))
}
