use anyhow::{Context, Result, bail};
use std::path::PathBuf;
use std::time::Duration;

use crate::bridge::{BridgeSettings, DEFAULT_LINE_BOUND};

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_WORKSPACE: &str = "/workspace";
pub const DEFAULT_AGENT_BIN: &str = "cursor-agent";
pub const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 900;
pub const DEFAULT_DATABASE_PATH: &str = "tion.db";
pub const DEFAULT_SERVICE_NAME: &str = "Tion Backend API";

/// Runtime configuration for both servers.
///
/// Values come from the process environment (after an optional `.env` has
/// been loaded) and may be overridden by CLI flags. Immutable once built and
/// shared through the server state.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub workspace: PathBuf,
    pub agent_bin: String,
    pub cursor_api_key: Option<String>,
    /// `None` means runs are never cut off.
    pub agent_timeout: Option<Duration>,
    pub stream_buffer: usize,
    pub github_repo: Option<String>,
    pub github_token: Option<String>,
    pub netlify_auth_token: Option<String>,
    pub netlify_site_id: Option<String>,
    pub debug: bool,
    pub database_path: PathBuf,
    pub api_key: Option<String>,
    pub service_name: String,
    pub version: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            host: DEFAULT_HOST.to_string(),
            workspace: PathBuf::from(DEFAULT_WORKSPACE),
            agent_bin: DEFAULT_AGENT_BIN.to_string(),
            cursor_api_key: None,
            agent_timeout: Some(Duration::from_secs(DEFAULT_AGENT_TIMEOUT_SECS)),
            stream_buffer: DEFAULT_LINE_BOUND,
            github_repo: None,
            github_token: None,
            netlify_auth_token: None,
            netlify_site_id: None,
            debug: false,
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            api_key: None,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let port = match get("PORT") {
            Some(v) => v
                .parse::<u16>()
                .with_context(|| format!("Invalid PORT value '{}'", v))?,
            None => defaults.port,
        };

        let agent_timeout = match get("AGENT_TIMEOUT_SECS") {
            Some(v) => {
                let secs = v
                    .parse::<u64>()
                    .with_context(|| format!("Invalid AGENT_TIMEOUT_SECS value '{}'", v))?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            None => defaults.agent_timeout,
        };

        let stream_buffer = match get("STREAM_BUFFER") {
            Some(v) => v
                .parse::<usize>()
                .with_context(|| format!("Invalid STREAM_BUFFER value '{}'", v))?,
            None => defaults.stream_buffer,
        };

        let debug = get("DEBUG")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            port,
            host: get("HOST").unwrap_or(defaults.host),
            workspace: get("WORKSPACE").map(PathBuf::from).unwrap_or(defaults.workspace),
            agent_bin: get("AGENT_BIN").unwrap_or(defaults.agent_bin),
            cursor_api_key: get("CURSOR_API_KEY"),
            agent_timeout,
            stream_buffer,
            github_repo: get("GITHUB_REPO"),
            github_token: get("GITHUB_TOKEN"),
            netlify_auth_token: get("NETLIFY_AUTH_TOKEN"),
            netlify_site_id: get("NETLIFY_SITE_ID"),
            debug,
            database_path: get("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.database_path),
            api_key: get("API_KEY"),
            service_name: get("SERVICE_NAME").unwrap_or(defaults.service_name),
            version: get("VERSION").unwrap_or(defaults.version),
        })
    }

    /// Checks required by the agent server.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("PORT must be a non-zero port number");
        }
        if self.workspace.as_os_str().is_empty() {
            bail!("WORKSPACE is required");
        }
        if self.cursor_api_key.is_none() {
            bail!("CURSOR_API_KEY is required");
        }
        if self.stream_buffer == 0 {
            bail!("STREAM_BUFFER must be at least 1");
        }
        Ok(())
    }

    pub fn is_github_configured(&self) -> bool {
        self.github_repo.is_some() && self.github_token.is_some()
    }

    pub fn is_netlify_configured(&self) -> bool {
        self.netlify_auth_token.is_some() && self.netlify_site_id.is_some()
    }

    /// Directory holding one subdirectory per frontend project.
    pub fn frontends_dir(&self) -> PathBuf {
        self.workspace.join("frontends")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn bridge_settings(&self) -> BridgeSettings {
        BridgeSettings {
            line_bound: self.stream_buffer,
            timeout: self.agent_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.workspace, PathBuf::from("/workspace"));
        assert_eq!(config.agent_bin, "cursor-agent");
        assert_eq!(config.agent_timeout, Some(Duration::from_secs(900)));
        assert_eq!(config.stream_buffer, 64);
        assert_eq!(config.database_path, PathBuf::from("tion.db"));
        assert!(!config.debug);
        assert!(!config.is_github_configured());
        assert!(!config.is_netlify_configured());
    }

    #[test]
    fn test_reads_all_overrides() {
        let config = config_from(&[
            ("PORT", "9000"),
            ("HOST", "0.0.0.0"),
            ("WORKSPACE", "/srv/ws"),
            ("CURSOR_API_KEY", "key"),
            ("AGENT_TIMEOUT_SECS", "30"),
            ("STREAM_BUFFER", "8"),
            ("GITHUB_REPO", "org/repo"),
            ("GITHUB_TOKEN", "ghp"),
            ("NETLIFY_AUTH_TOKEN", "nf"),
            ("NETLIFY_SITE_ID", "site"),
            ("DEBUG", "true"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
        assert_eq!(config.frontends_dir(), PathBuf::from("/srv/ws/frontends"));
        assert_eq!(config.cursor_api_key.as_deref(), Some("key"));
        assert_eq!(config.bridge_settings().line_bound, 8);
        assert_eq!(config.bridge_settings().timeout, Some(Duration::from_secs(30)));
        assert!(config.is_github_configured());
        assert!(config.is_netlify_configured());
        assert!(config.debug);
    }

    #[test]
    fn test_zero_timeout_disables_limit() {
        let config = config_from(&[("AGENT_TIMEOUT_SECS", "0")]).unwrap();
        assert_eq!(config.agent_timeout, None);
    }

    #[test]
    fn test_empty_values_count_as_unset() {
        let config = config_from(&[("CURSOR_API_KEY", "  "), ("PORT", "")]).unwrap();
        assert!(config.cursor_api_key.is_none());
        assert_eq!(config.port, 8080);
    }

    #[test]
    fn test_invalid_port_is_an_error() {
        let err = config_from(&[("PORT", "eighty")]).unwrap_err();
        assert!(err.to_string().contains("Invalid PORT"));
    }

    #[test]
    fn test_validate_requires_agent_key() {
        let config = config_from(&[]).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("CURSOR_API_KEY"));

        let config = config_from(&[("CURSOR_API_KEY", "k")]).unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let config = Config {
            port: 0,
            cursor_api_key: Some("k".into()),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_netlify_config_is_not_configured() {
        let config = config_from(&[("NETLIFY_AUTH_TOKEN", "nf")]).unwrap();
        assert!(!config.is_netlify_configured());
    }
}
