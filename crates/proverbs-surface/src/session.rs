//! Session host: binds a runtime URL and agent, owns the conversation, and
//! drives runs against the runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use proverbs_core::config::{
    Config, DEFAULT_AGENT_NAME, DEFAULT_ENDPOINT, DEFAULT_MAX_FOLLOW_UPS, DEFAULT_THEME_COLOR,
};
use proverbs_core::error::{ProverbsError, Result};
use proverbs_core::protocol::{Message, RunAgentInput};

use crate::actions::{ActionDescriptor, ActionHandle, ActionRegistry};
use crate::run::{RunOutcome, RunState, RunTargets, TranscriptEntry};
use crate::sse::{decode_events, parse_response};
use crate::state::{AgentStateStore, StateView};

/// Where and to whom the session talks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopilotConfig {
    pub runtime_url: String,
    pub agent: String,
    /// Fixed thread id; a fresh one is generated when unset.
    pub thread_id: Option<String>,
    pub max_follow_ups: u32,
    pub theme_color: String,
}

impl CopilotConfig {
    pub fn new(runtime_url: impl Into<String>) -> Self {
        Self {
            runtime_url: runtime_url.into(),
            agent: DEFAULT_AGENT_NAME.to_string(),
            thread_id: None,
            max_follow_ups: DEFAULT_MAX_FOLLOW_UPS,
            theme_color: DEFAULT_THEME_COLOR.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            runtime_url: config.runtime_url(),
            agent: config.default_agent(),
            thread_id: None,
            max_follow_ups: config.max_follow_ups(),
            theme_color: config.theme_color(),
        }
    }

    pub fn with_thread_id(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_max_follow_ups(mut self, max: u32) -> Self {
        self.max_follow_ups = max;
        self
    }
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self::new(format!("http://127.0.0.1:8080{DEFAULT_ENDPOINT}"))
    }
}

/// Result of one `send_message` turn.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub thread_id: String,
    /// Every run issued for the turn, follow-ups included.
    pub run_ids: Vec<String>,
    pub follow_ups: u32,
    pub events: usize,
    /// Tool calls answered by local handlers.
    pub local_results: usize,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// The session shared by a page and its chat.
pub struct SessionHost {
    config: CopilotConfig,
    thread_id: String,
    client: reqwest::Client,
    actions: RwLock<ActionRegistry>,
    states: RwLock<HashMap<String, Arc<AgentStateStore>>>,
    transcript: RwLock<Vec<TranscriptEntry>>,
    messages: Mutex<Vec<Message>>,
    turn: tokio::sync::Mutex<()>,
    running: AtomicBool,
}

impl SessionHost {
    pub fn new(config: CopilotConfig) -> Self {
        Self::with_client(config, reqwest::Client::new())
    }

    pub fn with_client(config: CopilotConfig, client: reqwest::Client) -> Self {
        let thread_id = config
            .thread_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        info!(runtime_url = %config.runtime_url, agent = %config.agent, %thread_id, "Session created");
        Self {
            config,
            thread_id,
            client,
            actions: RwLock::new(ActionRegistry::new()),
            states: RwLock::new(HashMap::new()),
            transcript: RwLock::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            turn: tokio::sync::Mutex::new(()),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &CopilotConfig {
        &self.config
    }

    /// The agent every run is sent to.
    pub fn agent(&self) -> &str {
        &self.config.agent
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Subscribe to an agent's shared state, starting from `initial`.
    pub fn use_agent_state<T>(&self, agent: &str, initial: T) -> StateView<T>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        self.state_store(agent).view(initial)
    }

    fn state_store(&self, agent: &str) -> Arc<AgentStateStore> {
        if let Some(store) = self.states.read().get(agent) {
            return store.clone();
        }
        self.states
            .write()
            .entry(agent.to_string())
            .or_insert_with(|| Arc::new(AgentStateStore::new(agent)))
            .clone()
    }

    pub fn register_action(&self, action: ActionDescriptor) -> ActionHandle {
        self.actions.write().register(action)
    }

    pub fn unregister_action(&self, handle: &ActionHandle) -> bool {
        self.actions.write().unregister(handle)
    }

    pub fn action(&self, name: &str) -> Option<Arc<ActionDescriptor>> {
        self.actions.read().get(name)
    }

    /// Names of the actions offered to the agent as tools.
    pub fn offered_tools(&self) -> Vec<String> {
        self.actions.read().tools().into_iter().map(|t| t.name).collect()
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.transcript.read().clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Send a user message and drive the run, plus any follow-ups, to the end.
    ///
    /// Transport failures are also recorded in the transcript.
    pub async fn send_message(&self, text: &str) -> Result<RunSummary> {
        let _turn = self.turn.lock().await;
        self.running.store(true, Ordering::SeqCst);
        let _running = RunningGuard(&self.running);

        let started_at = Utc::now();
        self.messages
            .lock()
            .push(Message::user(text).with_id(uuid::Uuid::new_v4().to_string()));
        self.transcript.write().push(TranscriptEntry::user(text));

        let mut summary = RunSummary {
            thread_id: self.thread_id.clone(),
            run_ids: Vec::new(),
            follow_ups: 0,
            events: 0,
            local_results: 0,
            error: None,
            started_at,
            finished_at: started_at,
        };

        loop {
            let run_id = uuid::Uuid::new_v4().to_string();
            summary.run_ids.push(run_id.clone());

            let outcome = match self.run_once(&run_id).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(%run_id, error = %e, "Run failed");
                    self.transcript.write().push(TranscriptEntry::error(e.to_string()));
                    return Err(e);
                }
            };

            summary.events += outcome.events;
            summary.local_results += outcome.local_results;
            self.messages.lock().extend(outcome.messages);

            if let Some(error) = outcome.error {
                summary.error = Some(error);
                break;
            }
            if outcome.local_results == 0 {
                break;
            }
            if summary.follow_ups >= self.config.max_follow_ups {
                warn!(max = self.config.max_follow_ups, "Follow-up limit reached");
                break;
            }
            summary.follow_ups += 1;
            debug!(follow_up = summary.follow_ups, "Sending tool results back to the agent");
        }

        summary.finished_at = Utc::now();
        info!(
            thread_id = %summary.thread_id,
            runs = summary.run_ids.len(),
            events = summary.events,
            "Turn complete"
        );
        Ok(summary)
    }

    async fn run_once(&self, run_id: &str) -> Result<RunOutcome> {
        let store = self.state_store(&self.config.agent);
        let input = RunAgentInput::new(self.thread_id.clone(), run_id)
            .with_messages(self.messages())
            .with_tools(self.actions.read().tools())
            .with_state(
                store
                    .effective_value()
                    .unwrap_or_else(|| Value::Object(Default::default())),
            );
        input.validate()?;

        debug!(%run_id, url = %self.config.runtime_url, tools = input.tools.len(), "Posting run");
        let response = self
            .client
            .post(&self.config.runtime_url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&input)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProverbsError::Gateway(format!(
                "runtime returned {status}: {}",
                body.trim()
            )));
        }

        let targets = RunTargets {
            actions: &self.actions,
            state: &store,
            transcript: &self.transcript,
        };
        let mut run = RunState::new();
        let events = decode_events(parse_response(response));
        tokio::pin!(events);
        while let Some(event) = events.next().await {
            run.apply(event?, &targets);
            if run.is_finished() {
                break;
            }
        }

        Ok(run.finish(&targets))
    }
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = CopilotConfig::default();
        assert_eq!(config.runtime_url, "http://127.0.0.1:8080/api/copilotkit");
        assert_eq!(config.agent, "ProverbsAgent");
        assert_eq!(config.max_follow_ups, 5);
        assert_eq!(config.theme_color, "#6366f1");
    }

    #[test]
    fn test_config_from_file_config() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "gateway": { "port": 9000 },
            "surface": { "max_follow_ups": 2, "theme_color": "#000" }
        }))
        .unwrap();
        let copilot = CopilotConfig::from_config(&config);
        assert_eq!(copilot.runtime_url, "http://127.0.0.1:9000/api/copilotkit");
        assert_eq!(copilot.max_follow_ups, 2);
        assert_eq!(copilot.theme_color, "#000");
    }

    #[test]
    fn test_fixed_thread_id() {
        let host = SessionHost::new(CopilotConfig::default().with_thread_id("thread-7"));
        assert_eq!(host.thread_id(), "thread-7");
        assert!(!host.is_running());
    }

    #[test]
    fn test_state_views_share_a_store() {
        let host = SessionHost::new(CopilotConfig::default());
        let a = host.use_agent_state("ProverbsAgent", serde_json::json!({"proverbs": []}));
        let b = host.use_agent_state("ProverbsAgent", serde_json::json!({"proverbs": []}));
        host.state_store("ProverbsAgent")
            .apply_snapshot(serde_json::json!({"proverbs": ["x"]}));
        assert_eq!(a.current(), b.current());
        assert_eq!(a.current()["proverbs"][0], "x");
    }

    #[tokio::test]
    async fn test_unreachable_runtime_is_recorded() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let host = SessionHost::new(CopilotConfig::new(format!("http://127.0.0.1:{port}/api/copilotkit")));
        let err = host.send_message("hello").await.unwrap_err();
        assert!(matches!(err, ProverbsError::Http(_)));

        let transcript = host.transcript();
        assert_eq!(transcript.len(), 2);
        assert!(matches!(transcript[1], TranscriptEntry::Error { .. }));
        assert!(!host.is_running());
    }
}
