//! Remote agent registry.
//!
//! Each registered agent implements [`RemoteAgent`]. The registry is built
//! once from config and never changes afterwards.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderValue, StatusCode};
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use serde::Serialize;
use tracing::{debug, info};

use proverbs_core::config::Config;
use proverbs_core::error::{ProverbsError, Result};

/// Streamed response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// An inbound run, forwarded as-is.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub body: Bytes,
    pub content_type: Option<HeaderValue>,
    pub accept: Option<HeaderValue>,
}

/// The agent's answer: status, content type and the raw body stream.
pub struct AgentResponse {
    pub status: StatusCode,
    pub content_type: Option<HeaderValue>,
    pub body: ByteStream,
}

/// Public description of a registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A remote agent the gateway can relay to.
#[async_trait]
pub trait RemoteAgent: Send + Sync {
    /// Registration name (e.g. "ProverbsAgent").
    fn name(&self) -> &str;

    fn description(&self) -> Option<&str> {
        None
    }

    /// Forward a run and return the agent's response without reading the body.
    async fn run(&self, request: AgentRequest) -> Result<AgentResponse>;
}

/// Agent reached over HTTP: the run body is POSTed to its base URL.
pub struct HttpAgent {
    name: String,
    url: String,
    description: Option<String>,
    client: reqwest::Client,
}

impl HttpAgent {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            description: None,
            client,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RemoteAgent for HttpAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    async fn run(&self, request: AgentRequest) -> Result<AgentResponse> {
        let content_type = request
            .content_type
            .unwrap_or_else(|| HeaderValue::from_static("application/json"));
        let accept = request
            .accept
            .unwrap_or_else(|| HeaderValue::from_static("text/event-stream"));

        debug!(agent = %self.name, url = %self.url, bytes = request.body.len(), "Forwarding run");

        let response = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::ACCEPT, accept)
            .body(request.body)
            .send()
            .await
            .map_err(|e| ProverbsError::Agent(format!("agent '{}' unreachable: {e}", self.name)))?;

        let status = response.status();
        let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
        let body = response.bytes_stream().map_err(std::io::Error::other);

        Ok(AgentResponse {
            status,
            content_type,
            body: Box::pin(body),
        })
    }
}

/// Immutable name → agent map with one default agent.
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn RemoteAgent>>,
    default: Arc<dyn RemoteAgent>,
}

impl AgentRegistry {
    /// Build a registry; `default_name` must be one of `agents` and names must be unique.
    pub fn new(default_name: &str, agents: Vec<Arc<dyn RemoteAgent>>) -> Result<Self> {
        let mut map: HashMap<String, Arc<dyn RemoteAgent>> = HashMap::new();
        for agent in agents {
            let name = agent.name().to_string();
            if map.insert(name.clone(), agent).is_some() {
                return Err(ProverbsError::Config(format!(
                    "agent '{name}' is registered more than once"
                )));
            }
        }

        let default = map.get(default_name).cloned().ok_or_else(|| {
            ProverbsError::Config(format!("default agent '{default_name}' is not registered"))
        })?;

        Ok(Self {
            agents: map,
            default,
        })
    }

    /// Build HTTP agents for every configured registration.
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.delegate_to_service_adapter() {
            return Err(ProverbsError::Config(
                "delegate_to_service_adapter is not supported: the gateway only relays".into(),
            ));
        }

        let client = reqwest::Client::new();
        let agents = config
            .agent_registrations()
            .into_iter()
            .map(|reg| {
                let url = reg.resolve_url();
                info!(agent = %reg.name, %url, "Registered remote agent");
                Arc::new(
                    HttpAgent::new(reg.name, url, client.clone()).with_description(reg.description),
                ) as Arc<dyn RemoteAgent>
            })
            .collect();

        Self::new(&config.default_agent(), agents)
    }

    /// The agent every inbound run is routed to.
    pub fn default_agent(&self) -> Arc<dyn RemoteAgent> {
        self.default.clone()
    }

    /// Number of registered agents.
    pub fn count(&self) -> usize {
        self.agents.len()
    }

    /// Registered agents sorted by name.
    pub fn list(&self) -> Vec<AgentInfo> {
        let mut infos: Vec<AgentInfo> = self
            .agents
            .values()
            .map(|a| AgentInfo {
                name: a.name().to_string(),
                description: a.description().map(str::to_string),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}
