//! Request gating: which requests get snapshots, for which language, at which URL.

use axum::http::{HeaderMap, Uri, header};
use regex::Regex;
use thiserror::Error;
use url::{Url, form_urlencoded};

use crate::domain::entities::DEFAULT_LANGUAGE;

use super::keys::strip_control_params;

/// Query parameter forcing a request through the gate.
pub const FORCE_PARAM: &str = "__render-force";

/// Query parameter overriding the snapshot language.
pub const LANGUAGE_PARAM: &str = "__render-language";

/// User-Agent fragments identifying crawlers and link preview bots.
pub const BOT_USER_AGENTS: &[&str] = &[
    "applebot",
    "baiduspider",
    "bingbot",
    "bitlybot",
    "crawler",
    "discordbot",
    "duckduckbot",
    "embedly",
    "facebookexternalhit",
    "flipboard",
    "google page speed",
    "googlebot",
    "headless",
    "linkedinbot",
    "nuzzel",
    "outbrain",
    "pinterest",
    "quora link preview",
    "qwantify",
    "reddit",
    "rogerbot",
    "showyoubot",
    "skypeuripreview",
    "slackbot",
    "slurp",
    "spider",
    "tumblr",
    "twitterbot",
    "vkshare",
    "w3c_validator",
    "whatsapp",
    "yandexbot",
];

#[derive(Debug, Error)]
pub enum GateError {
    #[error("invalid path pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    bot_agents: Vec<String>,
    patterns: Vec<Regex>,
    public_origin: Option<Url>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            bot_agents: BOT_USER_AGENTS.iter().map(|agent| agent.to_string()).collect(),
            patterns: Vec::new(),
            public_origin: None,
        }
    }
}

impl GateConfig {
    /// Build a gate from path patterns and additional bot tokens.
    ///
    /// Patterns are anchored: `/blog/.*` matches `/blog/x` but not `/en/blog/x`.
    pub fn new(
        patterns: &[String],
        extra_bot_agents: &[String],
        public_origin: Option<Url>,
    ) -> Result<Self, GateError> {
        let patterns = patterns
            .iter()
            .map(|pattern| compile_pattern(pattern))
            .collect::<Result<Vec<_>, _>>()?;

        let mut bot_agents: Vec<String> =
            BOT_USER_AGENTS.iter().map(|agent| agent.to_string()).collect();
        bot_agents.extend(
            extra_bot_agents
                .iter()
                .map(|agent| agent.trim().to_ascii_lowercase())
                .filter(|agent| !agent.is_empty()),
        );

        Ok(Self {
            bot_agents,
            patterns,
            public_origin,
        })
    }

    /// Whether the User-Agent names a known crawler, case-insensitively.
    pub fn is_bot(&self, headers: &HeaderMap) -> bool {
        let Some(agent) = headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
        else {
            return false;
        };
        let agent = agent.to_ascii_lowercase();
        self.bot_agents
            .iter()
            .any(|token| agent.contains(token.as_str()))
    }

    /// An empty pattern list matches every path.
    pub fn matches_path(&self, path: &str) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|pattern| pattern.is_match(path))
    }

    /// Bots and forced requests are eligible for snapshots.
    pub fn is_eligible(&self, headers: &HeaderMap, query: Option<&str>) -> bool {
        self.is_bot(headers) || is_forced(query)
    }

    /// Public URL handed to the render engine, without gate control parameters.
    pub fn public_url(&self, uri: &Uri, headers: &HeaderMap) -> Option<Url> {
        let mut url = match &self.public_origin {
            Some(origin) => origin.clone(),
            None => {
                let host = headers
                    .get(header::HOST)
                    .and_then(|value| value.to_str().ok())
                    .or_else(|| uri.authority().map(|authority| authority.as_str()))?;
                let scheme = uri.scheme_str().unwrap_or("http");
                Url::parse(&format!("{scheme}://{host}/")).ok()?
            }
        };

        url.set_path(uri.path());
        let query = uri.query().map(strip_control_params).unwrap_or_default();
        url.set_query((!query.is_empty()).then_some(query.as_str()));
        Some(url)
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, GateError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| GateError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// `__render-force=true` in the query string.
pub fn is_forced(query: Option<&str>) -> bool {
    query_param(query, FORCE_PARAM).is_some_and(|value| value == "true")
}

/// Snapshot language: `__render-language`, then the first `Accept-Language` entry,
/// then the default tag.
pub fn resolve_language(query: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(language) = query_param(query, LANGUAGE_PARAM)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
    {
        return language;
    }

    headers
        .get(header::ACCEPT_LANGUAGE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|first| first.split(';').next().unwrap_or(first).trim())
        .filter(|first| !first.is_empty() && *first != "*")
        .map(str::to_string)
        .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string())
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}
