//! Configuration loading and validation.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// Agent name the page and the gateway use unless configured otherwise.
pub const DEFAULT_AGENT_NAME: &str = "ProverbsAgent";

/// Environment variable holding the remote agent's base URL.
pub const AGENT_URL_ENV: &str = "NEXT_PUBLIC_AGENT_URL";

/// Agent URL used when neither the config nor the environment provide one.
pub const DEFAULT_AGENT_URL: &str = "http://localhost:8000";

/// Path the gateway mounts the runtime endpoint on.
pub const DEFAULT_ENDPOINT: &str = "/api/copilotkit";

/// Initial theme color of the page.
pub const DEFAULT_THEME_COLOR: &str = "#6366f1";

const DEFAULT_GATEWAY_PORT: u16 = 8080;
pub const DEFAULT_MAX_FOLLOW_UPS: u32 = 5;

/// Top-level Proverbs configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<AgentsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub surface: Option<SurfaceConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Path of the runtime endpoint (default: "/api/copilotkit").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_GATEWAY_PORT
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentsConfig {
    /// Name of the agent every inbound request is routed to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Let the runtime's service adapter process requests locally.
    /// Only `false` is supported: the gateway is a pure relay.
    #[serde(default)]
    pub delegate_to_service_adapter: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registry: Vec<AgentRegistration>,
}

/// A named remote agent reachable over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRegistration {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Environment variable to read the URL from (default: NEXT_PUBLIC_AGENT_URL).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl AgentRegistration {
    /// The registration used when the config names no agents.
    pub fn proverbs_default() -> Self {
        Self {
            name: DEFAULT_AGENT_NAME.into(),
            url: None,
            url_env: Some(AGENT_URL_ENV.into()),
            description: Some("ADK agent that manages a shared list of proverbs".into()),
        }
    }

    /// Resolve the agent URL: `url` first, then the `url_env` variable,
    /// then `http://localhost:8000`.
    pub fn resolve_url(&self) -> String {
        self.resolve_url_with(|var| std::env::var(var).ok())
    }

    /// Same as [`resolve_url`](Self::resolve_url) with an explicit environment lookup.
    pub fn resolve_url_with(&self, lookup: impl Fn(&str) -> Option<String>) -> String {
        if let Some(url) = self.url.as_ref().filter(|u| !u.is_empty()) {
            return url.clone();
        }
        let var = self.url_env.as_deref().unwrap_or(AGENT_URL_ENV);
        lookup(var)
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_AGENT_URL.to_string())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SurfaceConfig {
    /// Full URL of the runtime endpoint the page talks to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme_color: Option<String>,

    /// Follow-up runs allowed after frontend tool results (default: 5).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_follow_ups: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "proverbs_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
            level: None,
            filters: Vec::new(),
            output: default_log_output(),
        }
    }
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

static ENV_VAR_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\$\{([^}]+)\}").expect("valid env var pattern"));

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| {
                tracing::warn!(var = &caps[1], "Config references an unset environment variable");
                String::new()
            })
        })
        .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    ///
    /// A missing file yields the default config.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let substituted = substitute_env_vars(&raw);

        json5::from_str(&substituted)
            .map_err(|e| crate::error::ProverbsError::Config(e.to_string()))
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Expand `~` in a user-supplied config path.
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).as_ref())
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway
            .as_ref()
            .map(|g| g.port)
            .unwrap_or(DEFAULT_GATEWAY_PORT)
    }

    pub fn bind_addr(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.bind.clone())
            .unwrap_or_else(|| "0.0.0.0".to_string())
    }

    /// Runtime endpoint path, e.g. "/api/copilotkit".
    pub fn endpoint(&self) -> String {
        self.gateway
            .as_ref()
            .and_then(|g| g.endpoint.clone())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
    }

    /// Name of the agent inbound requests are routed to.
    pub fn default_agent(&self) -> String {
        self.agents
            .as_ref()
            .and_then(|a| a.default.clone())
            .unwrap_or_else(|| DEFAULT_AGENT_NAME.to_string())
    }

    pub fn delegate_to_service_adapter(&self) -> bool {
        self.agents
            .as_ref()
            .is_some_and(|a| a.delegate_to_service_adapter)
    }

    /// Registered agents, or the single ProverbsAgent registration when none are configured.
    pub fn agent_registrations(&self) -> Vec<AgentRegistration> {
        match self.agents.as_ref() {
            Some(agents) if !agents.registry.is_empty() => agents.registry.clone(),
            _ => vec![AgentRegistration::proverbs_default()],
        }
    }

    /// URL the interaction surface posts runs to.
    ///
    /// Defaults to this process's own gateway endpoint on loopback.
    pub fn runtime_url(&self) -> String {
        self.surface
            .as_ref()
            .and_then(|s| s.runtime_url.clone())
            .unwrap_or_else(|| self.gateway_url(self.gateway_port()))
    }

    /// URL of this gateway's runtime endpoint as reached from the same host.
    ///
    /// A wildcard bind address is reached over loopback; any other bind
    /// address is used as is.
    pub fn gateway_url(&self, port: u16) -> String {
        let bind = self.bind_addr();
        let host = match bind.parse::<std::net::IpAddr>() {
            Ok(ip) if ip.is_unspecified() => "127.0.0.1".to_string(),
            Ok(std::net::IpAddr::V6(ip)) => format!("[{ip}]"),
            _ => bind,
        };
        format!("http://{host}:{port}{}", self.endpoint())
    }

    pub fn theme_color(&self) -> String {
        self.surface
            .as_ref()
            .and_then(|s| s.theme_color.clone())
            .unwrap_or_else(|| DEFAULT_THEME_COLOR.to_string())
    }

    pub fn max_follow_ups(&self) -> u32 {
        self.surface
            .as_ref()
            .and_then(|s| s.max_follow_ups)
            .unwrap_or(DEFAULT_MAX_FOLLOW_UPS)
    }

    /// Get a config value by dotted path (e.g. "gateway.port", "agents.default").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if self.delegate_to_service_adapter() {
            errors.push(
                "agents.delegate_to_service_adapter is not supported: the gateway only relays to remote agents"
                    .to_string(),
            );
        }

        if self.gateway.as_ref().is_some_and(|g| g.port == 0) {
            errors.push("Gateway port cannot be 0".to_string());
        }

        let endpoint = self.endpoint();
        if !endpoint.starts_with('/') {
            errors.push(format!("Gateway endpoint must start with '/': {endpoint}"));
        }

        let registrations = self.agent_registrations();
        let mut seen = HashSet::new();
        for agent in &registrations {
            if !seen.insert(agent.name.as_str()) {
                errors.push(format!("Agent '{}' is registered more than once", agent.name));
            }
            let url = agent.resolve_url();
            if reqwest::Url::parse(&url).is_err() {
                errors.push(format!("Agent '{}' has an invalid URL: {url}", agent.name));
            }
            if agent.url.is_none() && url == DEFAULT_AGENT_URL {
                warnings.push(format!(
                    "Agent '{}' has no URL configured, using {DEFAULT_AGENT_URL}",
                    agent.name
                ));
            }
        }

        let default = self.default_agent();
        if !registrations.iter().any(|a| a.name == default) {
            errors.push(format!("Default agent '{default}' is not registered"));
        }

        (warnings, errors)
    }
}

/// Base directory for Proverbs data: `~/.proverbs/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".proverbs")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, variable name unique to this test
        unsafe { std::env::set_var("TEST_PV_AGENT_HOST", "agent.internal") };
        let input = r#"{"url": "http://${TEST_PV_AGENT_HOST}:9000", "other": "plain"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("http://agent.internal:9000"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_PV_AGENT_HOST") };
    }

    #[test]
    fn test_env_var_missing() {
        let input = r#"{"key": "${NONEXISTENT_VAR_PV_TEST}"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gateway_port(), 8080);
        assert_eq!(config.endpoint(), "/api/copilotkit");
        assert_eq!(config.default_agent(), "ProverbsAgent");
        assert_eq!(config.theme_color(), "#6366f1");
        assert_eq!(config.max_follow_ups(), 5);
        assert!(!config.delegate_to_service_adapter());
        assert_eq!(config.runtime_url(), "http://127.0.0.1:8080/api/copilotkit");

        let agents = config.agent_registrations();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].name, "ProverbsAgent");
        assert_eq!(agents[0].url_env.as_deref(), Some("NEXT_PUBLIC_AGENT_URL"));
    }

    #[test]
    fn test_agent_url_defaults_to_localhost_8000() {
        let agent = AgentRegistration::proverbs_default();
        assert_eq!(agent.resolve_url_with(no_env), "http://localhost:8000");

        // An empty variable counts as unset.
        let empty = agent.resolve_url_with(|_| Some(String::new()));
        assert_eq!(empty, "http://localhost:8000");
    }

    #[test]
    fn test_agent_url_from_env() {
        let agent = AgentRegistration::proverbs_default();
        let url = agent.resolve_url_with(|var| {
            (var == "NEXT_PUBLIC_AGENT_URL").then(|| "http://agents:8000".to_string())
        });
        assert_eq!(url, "http://agents:8000");
    }

    #[test]
    fn test_agent_url_direct_takes_priority() {
        let agent = AgentRegistration {
            name: "ProverbsAgent".into(),
            url: Some("http://direct:1234".into()),
            url_env: Some("NEXT_PUBLIC_AGENT_URL".into()),
            description: None,
        };
        let url = agent.resolve_url_with(|_| Some("http://from-env:8000".into()));
        assert_eq!(url, "http://direct:1234");
    }

    #[test]
    fn test_agent_url_custom_env_var() {
        // SAFETY: test-only, variable name unique to this test
        unsafe { std::env::set_var("TEST_PV_CUSTOM_AGENT_URL", "http://custom:7000") };
        let agent = AgentRegistration {
            name: "Other".into(),
            url: None,
            url_env: Some("TEST_PV_CUSTOM_AGENT_URL".into()),
            description: None,
        };
        assert_eq!(agent.resolve_url(), "http://custom:7000");
        unsafe { std::env::remove_var("TEST_PV_CUSTOM_AGENT_URL") };
    }

    #[test]
    fn test_logging_config_defaults() {
        let config: Config = json5::from_str(r#"{ logging: {} }"#).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_gateway_url_follows_bind_address() {
        let with_bind = |bind: &str| Config {
            gateway: Some(GatewayConfig {
                port: 8080,
                bind: Some(bind.into()),
                endpoint: None,
            }),
            ..Config::default()
        };
        assert_eq!(
            Config::default().gateway_url(9000),
            "http://127.0.0.1:9000/api/copilotkit"
        );
        assert_eq!(
            with_bind("10.1.2.3").gateway_url(8080),
            "http://10.1.2.3:8080/api/copilotkit"
        );
        assert_eq!(with_bind("::").gateway_url(8080), "http://127.0.0.1:8080/api/copilotkit");
        assert_eq!(with_bind("::1").gateway_url(8080), "http://[::1]:8080/api/copilotkit");
        assert_eq!(
            with_bind("10.1.2.3").runtime_url(),
            "http://10.1.2.3:8080/api/copilotkit"
        );
    }

    #[test]
    fn test_logging_default_matches_serde_defaults() {
        let logging = LoggingConfig::default();
        assert_eq!(logging.format, "plain");
        assert_eq!(logging.output, "stderr");
        assert!(logging.level.is_none());
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_json5_config_sections() {
        let config: Config = json5::from_str(
            r##"{
                // comments are allowed
                gateway: { port: 3000, endpoint: "/api/agent" },
                agents: {
                    default: "Weather",
                    registry: [
                        { name: "Weather", url: "http://weather:8000", description: "weather bot" },
                    ],
                },
                surface: { theme_color: "#000000", max_follow_ups: 2 },
            }"##,
        )
        .unwrap();
        assert_eq!(config.gateway_port(), 3000);
        assert_eq!(config.endpoint(), "/api/agent");
        assert_eq!(config.default_agent(), "Weather");
        assert_eq!(config.runtime_url(), "http://127.0.0.1:3000/api/agent");
        assert_eq!(config.theme_color(), "#000000");
        assert_eq!(config.max_follow_ups(), 2);
        assert_eq!(config.agent_registrations()[0].resolve_url(), "http://weather:8000");
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.gateway_port(), 8080);
    }

    #[test]
    fn test_load_substitutes_env() {
        // SAFETY: test-only, variable name unique to this test
        unsafe { std::env::set_var("TEST_PV_LOAD_PORT_AGENT", "http://loaded:8001") };
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ agents: { registry: [{ name: "ProverbsAgent", url: "${TEST_PV_LOAD_PORT_AGENT}" }] } }"#,
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.agent_registrations()[0].resolve_url(),
            "http://loaded:8001"
        );
        unsafe { std::env::remove_var("TEST_PV_LOAD_PORT_AGENT") };
    }

    #[test]
    fn test_load_invalid_json5_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ gateway: ").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, crate::error::ProverbsError::Config(_)));
    }

    #[test]
    fn test_serialized_config_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = Config {
            gateway: Some(GatewayConfig {
                port: 9999,
                bind: Some("127.0.0.1".into()),
                endpoint: None,
            }),
            ..Config::default()
        };
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.gateway_port(), 9999);
        assert_eq!(loaded.bind_addr(), "127.0.0.1");
    }

    #[test]
    fn test_get_path() {
        let config: Config = json5::from_str(r#"{ gateway: { port: 4000 } }"#).unwrap();
        assert_eq!(config.get_path("gateway.port"), Some(serde_json::json!(4000)));
        assert_eq!(config.get_path("gateway.missing"), None);
    }

    #[test]
    fn test_validate_rejects_service_adapter_delegation() {
        let config = Config {
            agents: Some(AgentsConfig {
                delegate_to_service_adapter: true,
                ..AgentsConfig::default()
            }),
            ..Config::default()
        };
        let (_warnings, errors) = config.validate();
        assert!(
            errors.iter().any(|e| e.contains("delegate_to_service_adapter")),
            "Expected an error about delegation, got: {errors:?}"
        );
    }

    #[test]
    fn test_validate_duplicate_and_missing_default() {
        let agent = AgentRegistration {
            name: "A".into(),
            url: Some("http://a:1".into()),
            url_env: None,
            description: None,
        };
        let config = Config {
            agents: Some(AgentsConfig {
                default: Some("B".into()),
                delegate_to_service_adapter: false,
                registry: vec![agent.clone(), agent],
            }),
            ..Config::default()
        };
        let (_warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("more than once")), "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("'B' is not registered")), "{errors:?}");
    }

    #[test]
    fn test_validate_bad_endpoint_and_url() {
        let config = Config {
            gateway: Some(GatewayConfig {
                port: 8080,
                bind: None,
                endpoint: Some("api/copilotkit".into()),
            }),
            agents: Some(AgentsConfig {
                default: None,
                delegate_to_service_adapter: false,
                registry: vec![AgentRegistration {
                    name: "ProverbsAgent".into(),
                    url: Some("not a url".into()),
                    url_env: None,
                    description: None,
                }],
            }),
            ..Config::default()
        };
        let (_warnings, errors) = config.validate();
        assert!(errors.iter().any(|e| e.contains("must start with '/'")), "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("invalid URL")), "{errors:?}");
    }
}
