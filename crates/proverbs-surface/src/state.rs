//! Local mirror of an agent's shared state.
//!
//! The run loop is the only writer. Snapshots replace the mirror; deltas are
//! JSON Patch documents applied to a copy, and the result replaces the mirror.
//! Pages hold a read-only [`StateView`].

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use proverbs_core::error::{ProverbsError, Result};

/// Mirror of one agent's state.
pub struct AgentStateStore {
    agent: String,
    tx: watch::Sender<Option<Value>>,
    /// Client-supplied initial value, used until the agent sends one.
    seed: Mutex<Option<Value>>,
}

impl AgentStateStore {
    pub fn new(agent: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            agent: agent.into(),
            tx,
            seed: Mutex::new(None),
        }
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// The latest value pushed by the agent, if any.
    pub fn agent_value(&self) -> Option<Value> {
        self.tx.borrow().clone()
    }

    /// Agent value, else the seed.
    pub fn effective_value(&self) -> Option<Value> {
        self.agent_value().or_else(|| self.seed.lock().clone())
    }

    pub(crate) fn seed(&self, initial: Value) {
        *self.seed.lock() = Some(initial);
    }

    /// Replace the mirror with a full snapshot.
    pub fn apply_snapshot(&self, snapshot: Value) {
        debug!(agent = %self.agent, "State snapshot");
        self.tx.send_replace(Some(snapshot));
    }

    /// Apply a JSON Patch delta. On failure the mirror is left unchanged.
    pub fn apply_delta(&self, delta: &[Value]) -> Result<()> {
        let ops = delta
            .iter()
            .map(|op| serde_json::from_value(op.clone()))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| ProverbsError::Protocol(format!("invalid state delta: {e}")))?;
        let patch = json_patch::Patch(ops);

        let mut doc = self
            .effective_value()
            .unwrap_or_else(|| Value::Object(Default::default()));
        json_patch::patch(&mut doc, &patch)
            .map_err(|e| ProverbsError::Protocol(format!("state delta did not apply: {e}")))?;

        debug!(agent = %self.agent, ops = delta.len(), "State delta applied");
        self.tx.send_replace(Some(doc));
        Ok(())
    }

    /// Typed read-only view with a fallback initial value.
    pub fn view<T>(&self, initial: T) -> StateView<T>
    where
        T: Serialize + DeserializeOwned + Clone,
    {
        match serde_json::to_value(&initial) {
            Ok(value) => self.seed(value),
            Err(e) => warn!(agent = %self.agent, error = %e, "Initial state is not serializable"),
        }
        StateView {
            agent: self.agent.clone(),
            rx: self.tx.subscribe(),
            initial,
        }
    }
}

/// Read-only typed view of an agent's state.
pub struct StateView<T> {
    agent: String,
    rx: watch::Receiver<Option<Value>>,
    initial: T,
}

impl<T> StateView<T>
where
    T: DeserializeOwned + Clone,
{
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Latest agent value, or the initial value until the agent sends one.
    pub fn current(&self) -> T {
        let value = self.rx.borrow().clone();
        match value {
            None => self.initial.clone(),
            Some(value) => match serde_json::from_value(value) {
                Ok(typed) => typed,
                Err(e) => {
                    warn!(agent = %self.agent, error = %e, "Agent state has an unexpected shape, using initial value");
                    self.initial.clone()
                }
            },
        }
    }

    /// Whether the agent has pushed any value yet.
    pub fn has_agent_value(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Wait for the next agent update.
    pub async fn changed(&mut self) -> Result<()> {
        self.rx
            .changed()
            .await
            .map_err(|_| ProverbsError::Protocol(format!("state store for '{}' closed", self.agent)))
    }
}

impl<T: Clone> Clone for StateView<T> {
    fn clone(&self) -> Self {
        Self {
            agent: self.agent.clone(),
            rx: self.rx.clone(),
            initial: self.initial.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Proverbs {
        proverbs: Vec<String>,
    }

    fn initial() -> Proverbs {
        Proverbs {
            proverbs: vec!["CopilotKit may be new, but it's the best thing since sliced bread.".into()],
        }
    }

    #[test]
    fn test_initial_until_first_update() {
        let store = AgentStateStore::new("ProverbsAgent");
        let view = store.view(initial());
        assert_eq!(view.current(), initial());
        assert!(!view.has_agent_value());
    }

    #[test]
    fn test_snapshot_replaces_wholesale() {
        let store = AgentStateStore::new("ProverbsAgent");
        let view = store.view(initial());
        store.apply_snapshot(json!({"proverbs": ["A penny saved is a penny earned."]}));
        assert_eq!(view.current().proverbs, vec!["A penny saved is a penny earned."]);

        store.apply_snapshot(json!({"proverbs": []}));
        assert!(view.current().proverbs.is_empty());
    }

    #[test]
    fn test_delta_applies_to_initial_value() {
        let store = AgentStateStore::new("ProverbsAgent");
        let view = store.view(initial());
        store
            .apply_delta(&[json!({"op": "add", "path": "/proverbs/-", "value": "Soap cleans all."})])
            .unwrap();
        assert_eq!(view.current().proverbs.len(), 2);
        assert_eq!(view.current().proverbs[1], "Soap cleans all.");
    }

    #[test]
    fn test_delta_applies_to_agent_value() {
        let store = AgentStateStore::new("ProverbsAgent");
        let view = store.view(initial());
        store.apply_snapshot(json!({"proverbs": ["one", "two"]}));
        store
            .apply_delta(&[json!({"op": "remove", "path": "/proverbs/0"})])
            .unwrap();
        assert_eq!(view.current().proverbs, vec!["two"]);
    }

    #[test]
    fn test_bad_delta_leaves_mirror_unchanged() {
        let store = AgentStateStore::new("ProverbsAgent");
        store.apply_snapshot(json!({"proverbs": ["one"]}));
        let err = store
            .apply_delta(&[json!({"op": "remove", "path": "/missing/3"})])
            .unwrap_err();
        assert!(err.to_string().contains("did not apply"));
        assert!(store.apply_delta(&[json!({"op": "explode"})]).is_err());
        assert_eq!(store.agent_value(), Some(json!({"proverbs": ["one"]})));
    }

    #[test]
    fn test_wrong_shape_falls_back_to_initial() {
        let store = AgentStateStore::new("ProverbsAgent");
        let view = store.view(initial());
        store.apply_snapshot(json!({"proverbs": "not a list"}));
        assert_eq!(view.current(), initial());
        assert!(view.has_agent_value());
    }

    #[tokio::test]
    async fn test_changed_resolves_on_update() {
        let store = AgentStateStore::new("ProverbsAgent");
        let mut view = store.view(initial());
        store.apply_snapshot(json!({"proverbs": ["new"]}));
        view.changed().await.unwrap();
        assert_eq!(view.current().proverbs, vec!["new"]);
    }
}
