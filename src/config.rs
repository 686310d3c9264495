//! Process-wide relay configuration, read once at startup

use log::info;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_UPSTREAM_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "deepseek/deepseek-chat-v3-0324:free";
pub const DEFAULT_PORT: u16 = 3001;

/// Attribution headers sent with every upstream call
pub const UPSTREAM_REFERER: &str = "https://github.com/frisson-labs/npc-chat";
pub const UPSTREAM_TITLE: &str = "NPC Chat Relay";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("upstream API key is empty")]
    MissingApiKey,
    #[error("invalid upstream URL '{url}': {reason}")]
    InvalidUpstreamUrl { url: String, reason: String },
    #[error("invalid outbound proxy '{url}': {source}")]
    InvalidProxy {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Relay settings. Every flag falls back to an environment variable.
#[derive(Debug, Clone, clap::Args)]
pub struct RelayConfig {
    /// Bearer token for the completion API
    #[arg(long, env = "OPENROUTER_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Chat completions endpoint
    #[arg(long, env = "UPSTREAM_URL", default_value = DEFAULT_UPSTREAM_URL)]
    pub upstream_url: String,

    #[arg(long, env = "UPSTREAM_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    #[arg(long, env = "UPSTREAM_MAX_TOKENS", default_value_t = 1000)]
    pub max_tokens: u32,

    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1")]
    pub bind: IpAddr,

    /// Outbound proxy for upstream calls, e.g. http://127.0.0.1:8080
    #[arg(long, env = "OUTBOUND_PROXY")]
    pub proxy: Option<String>,

    /// Give up on an upstream stream that stays silent this long
    #[arg(long, env = "UPSTREAM_IDLE_TIMEOUT_SECS", default_value_t = 60)]
    pub idle_timeout_secs: u64,
}

impl RelayConfig {
    /// Config pointing at `upstream_url` with defaults everywhere else
    pub fn new(api_key: impl Into<String>, upstream_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            upstream_url: upstream_url.into(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1000,
            port: DEFAULT_PORT,
            bind: IpAddr::from([127, 0, 0, 1]),
            proxy: None,
            idle_timeout_secs: 60,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.max(1))
    }

    /// Checks the settings that cannot be validated by the argument parser
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        reqwest::Url::parse(&self.upstream_url).map_err(|e| ConfigError::InvalidUpstreamUrl {
            url: self.upstream_url.clone(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Builds the shared outbound client, routed through the proxy when set
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        let mut builder = reqwest::Client::builder();
        if let Some(proxy_url) = self.proxy.as_deref().filter(|p| !p.trim().is_empty()) {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|source| ConfigError::InvalidProxy {
                url: proxy_url.to_string(),
                source,
            })?;
            info!("[config] Routing upstream calls through proxy {}", proxy_url);
            builder = builder.proxy(proxy);
        }
        builder.build().map_err(ConfigError::HttpClient)
    }
}

/// Parses `KEY=VALUE` lines, skipping blanks and `#` comments
pub fn parse_env_file(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Loads a `.env` file into the process environment without overriding
/// variables that are already set, and returns how many were set. A missing
/// file loads nothing. Must run before any threads are spawned, which is also
/// before the logger exists, so it reports through its return value only.
pub fn load_env_file(path: &Path) -> usize {
    let Ok(content) = std::fs::read_to_string(path) else {
        return 0;
    };

    let mut loaded = 0;
    for (key, value) in parse_env_file(&content) {
        if std::env::var_os(&key).is_none() {
            std::env::set_var(&key, value);
            loaded += 1;
        }
    }
    loaded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_file_parsing_skips_comments_and_strips_quotes() {
        let pairs = parse_env_file(
            "# upstream\nOPENROUTER_API_KEY=\"sk-test\"\n\nexport PORT=4000\nBROKEN\nPROXY='http://p:1'\n",
        );
        assert_eq!(
            pairs,
            vec![
                ("OPENROUTER_API_KEY".to_string(), "sk-test".to_string()),
                ("PORT".to_string(), "4000".to_string()),
                ("PROXY".to_string(), "http://p:1".to_string()),
            ]
        );
    }

    #[test]
    fn env_file_never_overrides_the_process_environment() {
        let dir = std::env::temp_dir().join(format!("npc-chat-env-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(".env");
        std::fs::write(
            &path,
            "NPC_CHAT_ENV_TEST_SET=from-file\nNPC_CHAT_ENV_TEST_NEW=fresh\n",
        )
        .unwrap();

        std::env::set_var("NPC_CHAT_ENV_TEST_SET", "from-process");
        std::env::remove_var("NPC_CHAT_ENV_TEST_NEW");

        assert_eq!(load_env_file(&path), 1);
        assert_eq!(std::env::var("NPC_CHAT_ENV_TEST_SET").unwrap(), "from-process");
        assert_eq!(std::env::var("NPC_CHAT_ENV_TEST_NEW").unwrap(), "fresh");

        assert_eq!(load_env_file(&dir.join("missing.env")), 0);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn validate_rejects_blank_key_and_bad_url() {
        let config = RelayConfig::new("  ", DEFAULT_UPSTREAM_URL);
        assert!(matches!(config.validate(), Err(ConfigError::MissingApiKey)));

        let config = RelayConfig::new("key", "not a url");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidUpstreamUrl { .. })
        ));

        assert!(RelayConfig::new("key", DEFAULT_UPSTREAM_URL).validate().is_ok());
    }

    #[test]
    fn proxy_is_applied_when_configured() {
        let mut config = RelayConfig::new("key", DEFAULT_UPSTREAM_URL);
        config.proxy = Some("http://127.0.0.1:8080".to_string());
        assert!(config.http_client().is_ok());
    }

    #[test]
    fn idle_timeout_never_drops_to_zero() {
        let mut config = RelayConfig::new("key", DEFAULT_UPSTREAM_URL);
        config.idle_timeout_secs = 0;
        assert_eq!(config.idle_timeout(), Duration::from_secs(1));
    }
}
