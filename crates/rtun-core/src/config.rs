use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub base_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: "~/.rtun".to_string(),
        }
    }
}

/// Settings for the public edge: the apex domain requests are stripped
/// against, the listener bind, and the ingress timing/rate-limit constants.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    pub domain: String,
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: f64,
    pub send_timeout_secs: f64,
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30.0,
            send_timeout_secs: 5.0,
            rate_limit_max: 100,
            rate_limit_window_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
        }
    }
}

/// Settings for the agent-side worker loop.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the edge this agent reports to (e.g. `https://tunnel.ex.com`).
    pub server_url: String,
    /// Agent API key; normally supplied via `--api-key` or `AGENT_API_KEY`
    /// rather than committed to a config file.
    pub api_key: String,
    pub poll_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub reconnect_delay_secs: u64,
    pub max_consecutive_errors: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            api_key: String::new(),
            poll_interval_secs: 5,
            heartbeat_interval_secs: 30,
            reconnect_delay_secs: 10,
            max_consecutive_errors: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub paths: PathsConfig,
    pub edge: EdgeConfig,
    pub auth: AuthConfig,
    pub agent: AgentConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            edge: EdgeConfig::default(),
            auth: AuthConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl Settings {
    /// Expand `~` to the user's home directory.
    fn expand_home(path: &str) -> PathBuf {
        if path.starts_with('~') {
            if let Some(home) = dirs::home_dir() {
                return home.join(&path[2..]);
            }
        }
        PathBuf::from(path)
    }

    /// Expanded base directory.
    pub fn base_dir(&self) -> PathBuf {
        Self::expand_home(&self.paths.base_dir)
    }

    /// Load settings from the TOML config file, then apply environment
    /// overrides for the handful of knobs operators flip most often.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let path = match config_path {
            Some(p) => p.clone(),
            None => Self::expand_home("~/.rtun/config.toml"),
        };

        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| CoreError::Config(format!("failed to read config: {e}")))?;
            toml::from_str(&content)
                .map_err(|e| CoreError::Config(format!("failed to parse config: {e}")))?
        } else {
            Settings::default()
        };

        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("DOMAIN") {
            self.edge.domain = v;
        }
        if let Ok(v) = std::env::var("PORT").and_then(|v| v.parse().map_err(|_| std::env::VarError::NotPresent)) {
            self.edge.port = v;
        }
        if let Ok(v) = std::env::var("REQUEST_TIMEOUT").and_then(|v| v.parse().map_err(|_| std::env::VarError::NotPresent)) {
            self.edge.request_timeout_secs = v;
        }
        if let Ok(v) = std::env::var("RATE_LIMIT_MAX").and_then(|v| v.parse().map_err(|_| std::env::VarError::NotPresent)) {
            self.edge.rate_limit_max = v;
        }
        if let Ok(v) = std::env::var("RATE_LIMIT_WINDOW_SECS").and_then(|v| v.parse().map_err(|_| std::env::VarError::NotPresent)) {
            self.edge.rate_limit_window_secs = v;
        }
        if let Ok(v) = std::env::var("SECRET_KEY") {
            self.auth.secret = v;
        }
        if let Ok(v) = std::env::var("AGENT_SERVER_URL") {
            self.agent.server_url = v;
        }
        if let Ok(v) = std::env::var("AGENT_API_KEY") {
            self.agent.api_key = v;
        }
    }

    /// Create necessary directories if they don't exist.
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(self.base_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[paths]
base_dir = "/tmp/rtuntest"

[edge]
domain = "ex.com"
host = "127.0.0.1"
port = 3000
request_timeout_secs = 45.0
send_timeout_secs = 5.0
rate_limit_max = 50
rate_limit_window_secs = 30

[auth]
secret = "s3cret"

[agent]
poll_interval_secs = 2
heartbeat_interval_secs = 15
reconnect_delay_secs = 3
max_consecutive_errors = 3
"#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.paths.base_dir, "/tmp/rtuntest");
        assert_eq!(settings.edge.domain, "ex.com");
        assert_eq!(settings.edge.port, 3000);
        assert_eq!(settings.auth.secret, "s3cret");
        assert_eq!(settings.agent.poll_interval_secs, 2);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_str = "";
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.paths.base_dir, "~/.rtun");
        assert_eq!(settings.edge.domain, "localhost");
        assert_eq!(settings.edge.port, 8080);
        assert_eq!(settings.edge.rate_limit_max, 100);
        assert_eq!(settings.agent.max_consecutive_errors, 5);
    }

    #[test]
    fn test_expand_home() {
        let path = Settings::expand_home("~/test");
        assert!(path.is_absolute());
        assert!(path.to_str().unwrap().ends_with("/test"));
    }

    #[test]
    fn test_invalid_toml() {
        let result = toml::from_str::<Settings>("{{invalid");
        assert!(result.is_err());
    }

    #[test]
    fn test_rate_limit_env_overrides() {
        std::env::set_var("RATE_LIMIT_MAX", "250");
        std::env::set_var("RATE_LIMIT_WINDOW_SECS", "120");
        let mut settings = Settings::default();
        settings.apply_env_overrides();
        assert_eq!(settings.edge.rate_limit_max, 250);
        assert_eq!(settings.edge.rate_limit_window_secs, 120);
        std::env::remove_var("RATE_LIMIT_MAX");
        std::env::remove_var("RATE_LIMIT_WINDOW_SECS");
    }

    #[test]
    fn test_ensure_directories() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("rtuntest");
        let settings = Settings {
            paths: PathsConfig {
                base_dir: base.to_str().unwrap().to_string(),
            },
            ..Default::default()
        };
        settings.ensure_directories().unwrap();
        assert!(base.exists());
    }
}
