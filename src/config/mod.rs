//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{CliArgs, Command, InspectArgs, ServeArgs, ServeOverrides, StatusArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "prerender";
const ENV_PREFIX: &str = "PRERENDER";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_TTL_SECS: u64 = 60 * 60;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 30;
const DEFAULT_HOT_LIMIT: usize = 256;
const DEFAULT_ASSETS_DIR: &str = "dist";
const DEFAULT_RENDER_USER_AGENT: &str = concat!("prerender/", env!("CARGO_PKG_VERSION"));

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub storage: StorageSettings,
    pub cache: CacheSettings,
    pub render: RenderSettings,
    pub gate: GateSettings,
    pub assets: AssetSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    pub public_origin: Option<Url>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    /// `None` keeps everything in memory.
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl_seconds: NonZeroU32,
    pub render_timeout_seconds: NonZeroU32,
    pub hot_limit: usize,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub endpoint: Option<Url>,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct GateSettings {
    pub patterns: Vec<String>,
    pub extra_bot_agents: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AssetSettings {
    pub directory: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("gate.patterns")
            .with_list_parse_key("gate.extra_bot_agents"),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Inspect(args)) => raw.apply_inspect_overrides(args),
        Some(Command::Status(_)) => {}
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    storage: RawStorageSettings,
    cache: RawCacheSettings,
    render: RawRenderSettings,
    gate: RawGateSettings,
    assets: RawAssetSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(origin) = overrides.server_public_origin.as_ref() {
            self.server.public_origin = Some(origin.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(directory) = overrides.storage_directory.as_ref() {
            self.storage.directory = Some(directory.clone());
        }
        if let Some(ttl) = overrides.cache_ttl_seconds {
            self.cache.ttl_seconds = Some(ttl);
        }
        if let Some(timeout) = overrides.cache_render_timeout_seconds {
            self.cache.render_timeout_seconds = Some(timeout);
        }
        if let Some(limit) = overrides.cache_hot_limit {
            self.cache.hot_limit = Some(limit);
        }
        if let Some(endpoint) = overrides.render_endpoint.as_ref() {
            self.render.endpoint = Some(endpoint.clone());
        }
        if let Some(agent) = overrides.render_user_agent.as_ref() {
            self.render.user_agent = Some(agent.clone());
        }
        if !overrides.gate_patterns.is_empty() {
            self.gate.patterns = Some(overrides.gate_patterns.clone());
        }
        if let Some(directory) = overrides.assets_directory.as_ref() {
            self.assets.directory = Some(directory.clone());
        }
    }

    fn apply_inspect_overrides(&mut self, args: &InspectArgs) {
        if let Some(directory) = args.storage_dir.as_ref() {
            self.storage.directory = Some(directory.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            storage,
            cache,
            render,
            gate,
            assets,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            storage: build_storage_settings(storage),
            cache: build_cache_settings(cache)?,
            render: build_render_settings(render)?,
            gate: build_gate_settings(gate)?,
            assets: build_asset_settings(assets)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    let public_origin = non_blank(server.public_origin)
        .map(|origin| parse_http_url(&origin, "server.public_origin"))
        .transpose()?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        public_origin,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_storage_settings(storage: RawStorageSettings) -> StorageSettings {
    let directory = storage
        .directory
        .filter(|directory| !directory.as_os_str().is_empty());
    StorageSettings { directory }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl_seconds = non_zero_u32(
        cache.ttl_seconds.unwrap_or(DEFAULT_TTL_SECS),
        "cache.ttl_seconds",
    )?;
    let render_timeout_seconds = non_zero_u32(
        cache
            .render_timeout_seconds
            .unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS),
        "cache.render_timeout_seconds",
    )?;

    let hot_limit = cache.hot_limit.unwrap_or(DEFAULT_HOT_LIMIT);
    if hot_limit == 0 {
        return Err(LoadError::invalid(
            "cache.hot_limit",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        ttl_seconds,
        render_timeout_seconds,
        hot_limit,
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let endpoint = non_blank(render.endpoint)
        .map(|endpoint| parse_http_url(&endpoint, "render.endpoint"))
        .transpose()?;

    let user_agent =
        non_blank(render.user_agent).unwrap_or_else(|| DEFAULT_RENDER_USER_AGENT.to_string());

    Ok(RenderSettings {
        endpoint,
        user_agent,
    })
}

fn build_gate_settings(gate: RawGateSettings) -> Result<GateSettings, LoadError> {
    let patterns: Vec<String> = gate
        .patterns
        .unwrap_or_default()
        .into_iter()
        .map(|pattern| pattern.trim().to_string())
        .filter(|pattern| !pattern.is_empty())
        .collect();
    for pattern in &patterns {
        Regex::new(pattern).map_err(|err| {
            LoadError::invalid("gate.patterns", format!("`{pattern}` is not a regex: {err}"))
        })?;
    }

    let extra_bot_agents = gate
        .extra_bot_agents
        .unwrap_or_default()
        .into_iter()
        .map(|agent| agent.trim().to_string())
        .filter(|agent| !agent.is_empty())
        .collect();

    Ok(GateSettings {
        patterns,
        extra_bot_agents,
    })
}

fn build_asset_settings(assets: RawAssetSettings) -> Result<AssetSettings, LoadError> {
    let directory = assets
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ASSETS_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "assets.directory",
            "path must not be empty",
        ));
    }
    Ok(AssetSettings { directory })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    public_origin: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    ttl_seconds: Option<u64>,
    render_timeout_seconds: Option<u64>,
    hot_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    endpoint: Option<String>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawGateSettings {
    patterns: Option<Vec<String>>,
    extra_bot_agents: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAssetSettings {
    directory: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn parse_http_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value)
        .map_err(|err| LoadError::invalid(key, format!("invalid url `{value}`: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{}`", url.scheme()),
        ));
    }
    Ok(url)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}
