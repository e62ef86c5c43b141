use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

pub(super) const DEFAULT_STATUS_SERVER: &str = "http://127.0.0.1:3000";

/// Command-line arguments for the prerender binary.
#[derive(Debug, Parser)]
#[command(
    name = "prerender",
    version,
    about = "Serves cached HTML snapshots of dynamic pages to crawlers"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PRERENDER_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the prerender HTTP service.
    Serve(Box<ServeArgs>),
    /// Query the render status of a page on a running server.
    Status(StatusArgs),
    /// Print the persisted task registry without starting the server.
    Inspect(InspectArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Origin used to build the URL handed to the render service.
    #[arg(long = "server-public-origin", value_name = "URL")]
    pub server_public_origin: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Directory holding snapshots and the task registry.
    #[arg(long = "storage-directory", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub storage_directory: Option<PathBuf>,

    /// Override the snapshot TTL.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<u64>,

    /// Override the render timeout.
    #[arg(long = "cache-render-timeout-seconds", value_name = "SECONDS")]
    pub cache_render_timeout_seconds: Option<u64>,

    /// Override the number of snapshots kept in memory.
    #[arg(long = "cache-hot-limit", value_name = "COUNT")]
    pub cache_hot_limit: Option<usize>,

    /// Render service endpoint receiving `{url, language}` POST requests.
    #[arg(long = "render-endpoint", value_name = "URL")]
    pub render_endpoint: Option<String>,

    /// User-Agent sent to the render service.
    #[arg(long = "render-user-agent", value_name = "AGENT")]
    pub render_user_agent: Option<String>,

    /// Path pattern eligible for snapshots; repeat for several. Replaces configured patterns.
    #[arg(long = "gate-pattern", value_name = "REGEX")]
    pub gate_patterns: Vec<String>,

    /// Directory of the single-page application build.
    #[arg(long = "assets-directory", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub assets_directory: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct StatusArgs {
    /// Base URL of the running prerender server.
    #[arg(
        long,
        env = "PRERENDER_SERVER",
        value_name = "URL",
        default_value = DEFAULT_STATUS_SERVER
    )]
    pub server: String,

    /// Absolute URL of the page to inspect.
    #[arg(long, value_name = "URL")]
    pub url: String,

    /// Language the page was rendered for.
    #[arg(long, value_name = "LANG")]
    pub language: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct InspectArgs {
    /// Storage directory to read; defaults to the configured one.
    #[arg(long = "storage-dir", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub storage_dir: Option<PathBuf>,
}
