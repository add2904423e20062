//! Frontend actions the agent can call.
//!
//! Each action has a name, a typed parameter list, and two optional effect
//! channels: a handler that runs locally and returns the tool result, and a
//! renderer that turns the call into a view fragment in the transcript.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use proverbs_core::error::Result;
use proverbs_core::protocol::Tool;

use crate::schema::{parameters_schema, Parameter};
use crate::view::View;

/// Whether the agent is offered the action as a tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Availability {
    #[default]
    Enabled,
    Disabled,
}

/// Progress of one tool call as seen by renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolCallStatus {
    /// Arguments are still streaming.
    InProgress,
    /// Arguments are complete and the call is running.
    Executing,
    Complete,
}

/// Local side effect of an action. Receives validated arguments.
pub trait ActionHandler: Send + Sync {
    fn invoke(&self, args: &Value) -> Result<Option<Value>>;
}

impl<F> ActionHandler for F
where
    F: Fn(&Value) -> Result<Option<Value>> + Send + Sync,
{
    fn invoke(&self, args: &Value) -> Result<Option<Value>> {
        self(args)
    }
}

/// Input to a renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderProps {
    pub name: String,
    pub args: Value,
    pub status: ToolCallStatus,
    pub result: Option<String>,
}

impl RenderProps {
    /// String argument by name, if present.
    pub fn arg_str(&self, name: &str) -> Option<&str> {
        self.args.get(name).and_then(Value::as_str)
    }
}

/// Visual side effect of an action.
pub trait ActionRenderer: Send + Sync {
    fn render(&self, props: &RenderProps) -> View;
}

impl<F> ActionRenderer for F
where
    F: Fn(&RenderProps) -> View + Send + Sync,
{
    fn render(&self, props: &RenderProps) -> View {
        self(props)
    }
}

/// A registered action.
#[derive(Clone)]
pub struct ActionDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<Parameter>,
    pub availability: Availability,
    pub handler: Option<Arc<dyn ActionHandler>>,
    pub renderer: Option<Arc<dyn ActionRenderer>>,
}

impl std::fmt::Debug for ActionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDescriptor")
            .field("name", &self.name)
            .field("availability", &self.availability)
            .field("parameters", &self.parameters)
            .field("handler", &self.handler.is_some())
            .field("renderer", &self.renderer.is_some())
            .finish()
    }
}

impl ActionDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: Vec::new(),
            availability: Availability::Enabled,
            handler: None,
            renderer: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn availability(mut self, availability: Availability) -> Self {
        self.availability = availability;
        self
    }

    pub fn handler(mut self, handler: impl ActionHandler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn renderer(mut self, renderer: impl ActionRenderer + 'static) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.availability == Availability::Enabled
    }

    /// Tool definition offered to the agent.
    pub fn to_tool(&self) -> Tool {
        Tool {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: Some(parameters_schema(&self.parameters)),
        }
    }
}

/// Proof of a registration, used to unregister it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActionHandle {
    name: String,
    generation: u64,
}

impl ActionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

struct Registered {
    generation: u64,
    action: Arc<ActionDescriptor>,
}

/// Name-keyed action registry. A later registration replaces an earlier one
/// with the same name.
#[derive(Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Registered>,
    next_generation: u64,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, action: ActionDescriptor) -> ActionHandle {
        self.next_generation += 1;
        let generation = self.next_generation;
        let name = action.name.clone();

        if self.actions.contains_key(&name) {
            warn!(action = %name, "Action registered twice, later registration wins");
        } else {
            debug!(action = %name, enabled = action.is_enabled(), "Action registered");
        }

        self.actions.insert(
            name.clone(),
            Registered {
                generation,
                action: Arc::new(action),
            },
        );
        ActionHandle { name, generation }
    }

    /// Remove the registration behind `handle`.
    ///
    /// Returns false if it was already replaced by a newer registration or
    /// removed.
    pub fn unregister(&mut self, handle: &ActionHandle) -> bool {
        match self.actions.get(&handle.name) {
            Some(entry) if entry.generation == handle.generation => {
                self.actions.remove(&handle.name);
                debug!(action = %handle.name, "Action unregistered");
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ActionDescriptor>> {
        self.actions.get(name).map(|entry| entry.action.clone())
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }

    /// Tool definitions for every enabled action, sorted by name.
    pub fn tools(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = self
            .actions
            .values()
            .filter(|entry| entry.action.is_enabled())
            .map(|entry| entry.action.to_tool())
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }
}
