//! Applies one run's AG-UI events to the session.
//!
//! [`RunState`] is a pure consumer: it updates the transcript, the shared
//! state mirror, and runs local action handlers. The session decides whether a
//! follow-up run is needed from the returned [`RunOutcome`].

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use proverbs_core::protocol::{Event, Message, ToolCall};

use crate::actions::{ActionRegistry, RenderProps, ToolCallStatus};
use crate::schema::validate_args;
use crate::state::AgentStateStore;

/// One chat entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptEntry {
    User {
        text: String,
        at: DateTime<Utc>,
    },
    Assistant {
        message_id: String,
        text: String,
        at: DateTime<Utc>,
    },
    ToolCall(ToolCallEntry),
    Error {
        message: String,
        at: DateTime<Utc>,
    },
}

impl TranscriptEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            text: text.into(),
            at: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// A tool call as seen in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallEntry {
    pub id: String,
    pub name: String,
    /// Raw argument text as streamed.
    pub args_text: String,
    /// Parsed arguments, `Null` until the call ends.
    pub args: Value,
    pub status: ToolCallStatus,
    pub result: Option<String>,
    /// Whether a local handler produced the result.
    pub handled_locally: bool,
    pub at: DateTime<Utc>,
}

impl ToolCallEntry {
    pub fn render_props(&self) -> RenderProps {
        RenderProps {
            name: self.name.clone(),
            args: self.args.clone(),
            status: self.status,
            result: self.result.clone(),
        }
    }
}

/// Session pieces a run writes to.
pub struct RunTargets<'a> {
    pub actions: &'a parking_lot::RwLock<ActionRegistry>,
    pub state: &'a AgentStateStore,
    pub transcript: &'a parking_lot::RwLock<Vec<TranscriptEntry>>,
}

/// What a finished run produced.
#[derive(Debug, Default)]
pub struct RunOutcome {
    /// Messages to append to the conversation, in order.
    pub messages: Vec<Message>,
    /// Tool calls answered by local handlers.
    pub local_results: usize,
    pub events: usize,
    pub finished: bool,
    pub error: Option<String>,
}

/// A text message or tool call, in the order the run started it.
enum Segment {
    Text { id: String, entry: usize },
    Call { id: String, entry: usize },
}

struct OpenCall {
    name: String,
    parent_message_id: Option<String>,
    entry: usize,
}

/// Event consumer for a single run.
#[derive(Default)]
pub struct RunState {
    /// message id -> transcript index, for text still streaming.
    open_text: HashMap<String, usize>,
    segments: Vec<Segment>,
    last_chunk_message: Option<String>,
    calls: HashMap<String, OpenCall>,
    call_order: Vec<String>,
    last_chunk_call: Option<String>,
    /// Tool results in arrival order: (call id, content, message id).
    results: Vec<(String, String, Option<String>)>,
    local_results: usize,
    events: usize,
    finished: bool,
    error: Option<String>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn apply(&mut self, event: Event, targets: &RunTargets<'_>) {
        self.events += 1;
        match event {
            Event::RunStarted { thread_id, run_id } => {
                debug!(%thread_id, %run_id, "Run started");
            }
            Event::RunFinished { run_id, .. } => {
                debug!(%run_id, "Run finished");
                self.finished = true;
            }
            Event::RunError { message, code } => {
                warn!(%message, code = code.as_deref().unwrap_or("-"), "Run error");
                targets.transcript.write().push(TranscriptEntry::error(message.clone()));
                self.error = Some(message);
                self.finished = true;
            }
            Event::StepStarted { step_name } | Event::StepFinished { step_name } => {
                debug!(step = %step_name, "Step");
            }

            Event::TextMessageStart { message_id, .. } => {
                self.start_text(&message_id, targets);
            }
            Event::TextMessageContent { message_id, delta } => {
                self.append_text(&message_id, &delta, targets);
            }
            Event::TextMessageEnd { message_id } => {
                self.open_text.remove(&message_id);
            }
            Event::TextMessageChunk { message_id, delta } => {
                let id = message_id
                    .or_else(|| self.last_chunk_message.clone())
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                if !self.open_text.contains_key(&id) {
                    self.start_text(&id, targets);
                }
                self.last_chunk_message = Some(id.clone());
                if let Some(delta) = delta {
                    self.append_text(&id, &delta, targets);
                }
            }

            Event::ToolCallStart {
                tool_call_id,
                tool_call_name,
                parent_message_id,
            } => {
                self.start_call(tool_call_id, tool_call_name, parent_message_id, targets);
            }
            Event::ToolCallArgs {
                tool_call_id,
                delta,
            } => {
                self.append_args(&tool_call_id, &delta, targets);
            }
            Event::ToolCallEnd { tool_call_id } => {
                self.end_call(&tool_call_id, targets);
            }
            Event::ToolCallChunk {
                tool_call_id,
                tool_call_name,
                delta,
            } => {
                let id = tool_call_id.or_else(|| self.last_chunk_call.clone());
                let Some(id) = id else {
                    warn!("Tool call chunk without an id");
                    return;
                };
                if !self.calls.contains_key(&id) {
                    match tool_call_name {
                        Some(name) => self.start_call(id.clone(), name, None, targets),
                        None => {
                            warn!(tool_call_id = %id, "Tool call chunk for unknown call without a name");
                            return;
                        }
                    }
                }
                self.last_chunk_call = Some(id.clone());
                if let Some(delta) = delta {
                    self.append_args(&id, &delta, targets);
                }
            }
            Event::ToolCallResult {
                message_id,
                tool_call_id,
                content,
            } => {
                self.attach_result(&tool_call_id, &content, targets);
                self.results.push((tool_call_id, content, Some(message_id)));
            }

            Event::StateSnapshot { snapshot } => targets.state.apply_snapshot(snapshot),
            Event::StateDelta { delta } => {
                if let Err(e) = targets.state.apply_delta(&delta) {
                    warn!(agent = targets.state.agent(), error = %e, "Dropping state delta");
                }
            }

            Event::MessagesSnapshot { messages } => {
                debug!(count = messages.len(), "Ignoring messages snapshot");
            }
            Event::Raw { .. } | Event::Custom { .. } | Event::Unknown => {}
        }
    }

    /// Close out the run: end streaming calls and build conversation messages.
    pub fn finish(mut self, targets: &RunTargets<'_>) -> RunOutcome {
        // Chunked calls have no END event.
        let pending: Vec<String> = self
            .call_order
            .iter()
            .filter(|id| self.calls.contains_key(*id))
            .cloned()
            .collect();
        for id in pending {
            self.end_call(&id, targets);
        }

        // Consecutive calls share one assistant message. Only calls that got a
        // result go into the history.
        let mut messages = Vec::new();
        let mut group = Vec::new();
        let mut transcript = targets.transcript.write();
        for segment in &self.segments {
            match segment {
                Segment::Text { id, entry } => {
                    if let Some(TranscriptEntry::Assistant { text, .. }) = transcript.get(*entry) {
                        if !text.is_empty() {
                            flush_tool_calls(&mut group, &self.results, &mut messages);
                            messages.push(Message::assistant(text.clone()).with_id(id.clone()));
                        }
                    }
                }
                Segment::Call { id, entry } => {
                    if let Some(TranscriptEntry::ToolCall(call)) = transcript.get_mut(*entry) {
                        call.status = ToolCallStatus::Complete;
                        if self.results.iter().any(|(result_id, _, _)| result_id == id) {
                            group.push(ToolCall::new(
                                call.id.clone(),
                                call.name.clone(),
                                call.args_text.clone(),
                            ));
                        }
                    }
                }
            }
        }
        drop(transcript);
        flush_tool_calls(&mut group, &self.results, &mut messages);

        RunOutcome {
            messages,
            local_results: self.local_results,
            events: self.events,
            finished: self.finished,
            error: self.error,
        }
    }

    fn start_text(&mut self, message_id: &str, targets: &RunTargets<'_>) {
        let mut transcript = targets.transcript.write();
        transcript.push(TranscriptEntry::Assistant {
            message_id: message_id.to_string(),
            text: String::new(),
            at: Utc::now(),
        });
        let index = transcript.len() - 1;
        self.open_text.insert(message_id.to_string(), index);
        self.segments.push(Segment::Text {
            id: message_id.to_string(),
            entry: index,
        });
    }

    fn append_text(&mut self, message_id: &str, delta: &str, targets: &RunTargets<'_>) {
        if !self.open_text.contains_key(message_id) {
            self.start_text(message_id, targets);
        }
        let index = self.open_text[message_id];
        if let Some(TranscriptEntry::Assistant { text, .. }) = targets.transcript.write().get_mut(index) {
            text.push_str(delta);
        }
    }

    fn start_call(
        &mut self,
        id: String,
        name: String,
        parent_message_id: Option<String>,
        targets: &RunTargets<'_>,
    ) {
        debug!(tool_call_id = %id, tool = %name, "Tool call started");
        let mut transcript = targets.transcript.write();
        transcript.push(TranscriptEntry::ToolCall(ToolCallEntry {
            id: id.clone(),
            name: name.clone(),
            args_text: String::new(),
            args: Value::Null,
            status: ToolCallStatus::InProgress,
            result: None,
            handled_locally: false,
            at: Utc::now(),
        }));
        let entry = transcript.len() - 1;
        self.call_order.push(id.clone());
        self.segments.push(Segment::Call {
            id: id.clone(),
            entry,
        });
        self.calls.insert(
            id,
            OpenCall {
                name,
                parent_message_id,
                entry,
            },
        );
    }

    fn append_args(&mut self, id: &str, delta: &str, targets: &RunTargets<'_>) {
        let Some(call) = self.calls.get(id) else {
            warn!(tool_call_id = %id, "Arguments for unknown tool call");
            return;
        };
        if let Some(TranscriptEntry::ToolCall(entry)) = targets.transcript.write().get_mut(call.entry) {
            entry.args_text.push_str(delta);
        }
    }

    /// Arguments are complete: parse, and run the local handler if there is one.
    fn end_call(&mut self, id: &str, targets: &RunTargets<'_>) {
        let Some(call) = self.calls.remove(id) else {
            warn!(tool_call_id = %id, "End of unknown tool call");
            return;
        };
        if let Some(parent) = &call.parent_message_id {
            debug!(tool_call_id = %id, parent = %parent, "Tool call ended");
        }

        let args_text = match targets.transcript.read().get(call.entry) {
            Some(TranscriptEntry::ToolCall(entry)) => entry.args_text.clone(),
            _ => String::new(),
        };
        let parsed = if args_text.trim().is_empty() {
            Ok(Value::Object(Default::default()))
        } else {
            serde_json::from_str::<Value>(&args_text)
        };

        let action = targets.actions.read().get(&call.name);
        let local = action
            .as_ref()
            .filter(|a| a.is_enabled())
            .and_then(|a| a.handler.clone().map(|h| (a.clone(), h)));

        let (args, result) = match (parsed, local) {
            (Ok(args), Some((action, handler))) => {
                self.set_status(call.entry, ToolCallStatus::Executing, &args, targets);
                let result = match validate_args(&action.parameters, &args)
                    .and_then(|()| handler.invoke(&args))
                {
                    Ok(Some(Value::String(text))) => text,
                    Ok(Some(value)) => value.to_string(),
                    Ok(None) => String::new(),
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "Action failed");
                        format!("Error: {e}")
                    }
                };
                info!(tool = %call.name, tool_call_id = %id, "Action handled locally");
                (args, Some(result))
            }
            (Err(e), Some(_)) => {
                warn!(tool = %call.name, error = %e, "Malformed tool arguments");
                (Value::Null, Some(format!("Error: invalid arguments: {e}")))
            }
            (Ok(args), None) => (args, None),
            (Err(e), None) => {
                debug!(tool = %call.name, error = %e, "Unparseable arguments for remote tool call");
                (Value::Null, None)
            }
        };

        match result {
            Some(content) => {
                self.local_results += 1;
                if let Some(TranscriptEntry::ToolCall(entry)) =
                    targets.transcript.write().get_mut(call.entry)
                {
                    entry.args = args;
                    entry.status = ToolCallStatus::Complete;
                    entry.result = Some(content.clone());
                    entry.handled_locally = true;
                }
                self.results.push((id.to_string(), content, None));
            }
            None => {
                // Executes elsewhere; shown for rendering only.
                self.set_status(call.entry, ToolCallStatus::Executing, &args, targets);
            }
        }
    }

    fn set_status(&self, index: usize, status: ToolCallStatus, args: &Value, targets: &RunTargets<'_>) {
        if let Some(TranscriptEntry::ToolCall(entry)) = targets.transcript.write().get_mut(index) {
            entry.status = status;
            entry.args = args.clone();
        }
    }

    fn attach_result(&mut self, id: &str, content: &str, targets: &RunTargets<'_>) {
        let mut transcript = targets.transcript.write();
        let found = transcript.iter_mut().rev().find_map(|entry| match entry {
            TranscriptEntry::ToolCall(call) if call.id == id => Some(call),
            _ => None,
        });
        match found {
            Some(call) => {
                call.status = ToolCallStatus::Complete;
                call.result = Some(content.to_string());
            }
            None => warn!(tool_call_id = %id, "Result for unknown tool call"),
        }
    }
}

/// Emit the pending calls as one assistant message followed by their results.
fn flush_tool_calls(
    group: &mut Vec<ToolCall>,
    results: &[(String, String, Option<String>)],
    messages: &mut Vec<Message>,
) {
    if group.is_empty() {
        return;
    }
    let calls = std::mem::take(group);
    let answered: Vec<(String, String, Option<String>)> = results
        .iter()
        .filter(|(id, _, _)| calls.iter().any(|call| call.id == *id))
        .cloned()
        .collect();
    messages.push(Message::assistant_tool_calls(calls).with_id(uuid::Uuid::new_v4().to_string()));
    for (call_id, content, message_id) in answered {
        let id = message_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        messages.push(Message::tool(content, call_id).with_id(id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use serde_json::json;

    use crate::actions::{ActionDescriptor, Availability};
    use crate::schema::Parameter;
    use proverbs_core::error::Result;
    use proverbs_core::protocol::Role;

    struct Fixture {
        actions: RwLock<ActionRegistry>,
        state: AgentStateStore,
        transcript: RwLock<Vec<TranscriptEntry>>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut registry = ActionRegistry::new();
            registry.register(
                ActionDescriptor::new("set_theme")
                    .parameter(Parameter::string("color"))
                    .handler(|args: &Value| -> Result<Option<Value>> {
                        if args["color"] == "boom" {
                            return Err(proverbs_core::error::ProverbsError::Action("boom".into()));
                        }
                        Ok(None)
                    }),
            );
            registry.register(
                ActionDescriptor::new("get_weather")
                    .parameter(Parameter::string("location"))
                    .availability(Availability::Disabled),
            );
            Self {
                actions: RwLock::new(registry),
                state: AgentStateStore::new("ProverbsAgent"),
                transcript: RwLock::new(Vec::new()),
            }
        }

        fn targets(&self) -> RunTargets<'_> {
            RunTargets {
                actions: &self.actions,
                state: &self.state,
                transcript: &self.transcript,
            }
        }

        fn run(&self, events: Vec<Event>) -> RunOutcome {
            let targets = self.targets();
            let mut run = RunState::new();
            for event in events {
                run.apply(event, &targets);
            }
            run.finish(&targets)
        }

        fn calls(&self) -> Vec<ToolCallEntry> {
            self.transcript
                .read()
                .iter()
                .filter_map(|e| match e {
                    TranscriptEntry::ToolCall(c) => Some(c.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    fn tool_call(id: &str, name: &str, args: &str) -> Vec<Event> {
        vec![
            Event::ToolCallStart {
                tool_call_id: id.into(),
                tool_call_name: name.into(),
                parent_message_id: None,
            },
            Event::ToolCallArgs {
                tool_call_id: id.into(),
                delta: args.into(),
            },
            Event::ToolCallEnd {
                tool_call_id: id.into(),
            },
        ]
    }

    #[test]
    fn test_text_message_accumulates() {
        let fx = Fixture::new();
        let outcome = fx.run(vec![
            Event::TextMessageStart {
                message_id: "m1".into(),
                role: Role::Assistant,
            },
            Event::TextMessageContent {
                message_id: "m1".into(),
                delta: "Hello, ".into(),
            },
            Event::TextMessageContent {
                message_id: "m1".into(),
                delta: "world".into(),
            },
            Event::TextMessageEnd {
                message_id: "m1".into(),
            },
            Event::RunFinished {
                thread_id: "t".into(),
                run_id: "r".into(),
                result: None,
            },
        ]);

        assert!(outcome.finished);
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].content, "Hello, world");
        assert_eq!(outcome.messages[0].id.as_deref(), Some("m1"));
        assert!(matches!(
            &fx.transcript.read()[0],
            TranscriptEntry::Assistant { text, .. } if text == "Hello, world"
        ));
    }

    #[test]
    fn test_text_chunks_reuse_last_id() {
        let fx = Fixture::new();
        let outcome = fx.run(vec![
            Event::TextMessageChunk {
                message_id: Some("c1".into()),
                delta: Some("Soap ".into()),
            },
            Event::TextMessageChunk {
                message_id: None,
                delta: Some("is good.".into()),
            },
        ]);
        assert_eq!(outcome.messages.len(), 1);
        assert_eq!(outcome.messages[0].content, "Soap is good.");
    }

    #[test]
    fn test_enabled_action_runs_locally() {
        let fx = Fixture::new();
        let outcome = fx.run(tool_call("call-1", "set_theme", r##"{"color":"#ff0000"}"##));

        assert_eq!(outcome.local_results, 1);
        let calls = fx.calls();
        assert_eq!(calls[0].status, ToolCallStatus::Complete);
        assert_eq!(calls[0].result.as_deref(), Some(""));
        assert!(calls[0].handled_locally);

        // assistant tool call message followed by the tool result
        assert_eq!(outcome.messages.len(), 2);
        let tool_calls = outcome.messages[0].tool_calls.as_ref().unwrap();
        assert_eq!(tool_calls[0].function.name, "set_theme");
        assert_eq!(outcome.messages[1].role, Role::Tool);
        assert_eq!(outcome.messages[1].tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn test_invalid_arguments_skip_handler() {
        let fx = Fixture::new();
        let outcome = fx.run(tool_call("call-1", "set_theme", r#"{"colour":"red"}"#));
        assert_eq!(outcome.local_results, 1);
        let result = fx.calls()[0].result.clone().unwrap();
        assert!(result.starts_with("Error: "));
        assert!(result.contains("unknown argument 'colour'"));
    }

    #[test]
    fn test_handler_error_reported() {
        let fx = Fixture::new();
        fx.run(tool_call("call-1", "set_theme", r#"{"color":"boom"}"#));
        assert_eq!(fx.calls()[0].result.as_deref(), Some("Error: Action error: boom"));
    }

    #[test]
    fn test_malformed_json_arguments() {
        let fx = Fixture::new();
        fx.run(tool_call("call-1", "set_theme", "{not json"));
        assert!(fx.calls()[0].result.as_deref().unwrap().starts_with("Error: invalid arguments"));
    }

    #[test]
    fn test_disabled_action_is_render_only() {
        let fx = Fixture::new();
        let outcome = fx.run(tool_call("call-9", "get_weather", r#"{"location":"Paris"}"#));

        assert_eq!(outcome.local_results, 0);
        assert!(outcome.messages.is_empty());
        let calls = fx.calls();
        assert_eq!(calls[0].args, json!({"location": "Paris"}));
        assert_eq!(calls[0].status, ToolCallStatus::Complete);
        assert!(calls[0].result.is_none());
        assert_eq!(calls[0].render_props().arg_str("location"), Some("Paris"));
    }

    #[test]
    fn test_remote_result_attached() {
        let fx = Fixture::new();
        let mut events = tool_call("call-2", "add_proverb", r#"{"proverb":"x"}"#);
        events.push(Event::ToolCallResult {
            message_id: "res-1".into(),
            tool_call_id: "call-2".into(),
            content: "added".into(),
        });
        let outcome = fx.run(events);

        assert_eq!(outcome.local_results, 0);
        assert_eq!(fx.calls()[0].result.as_deref(), Some("added"));
        assert!(!fx.calls()[0].handled_locally);
        assert_eq!(outcome.messages.len(), 2);
        assert_eq!(outcome.messages[1].id.as_deref(), Some("res-1"));
    }

    #[test]
    fn test_history_follows_event_order() {
        let fx = Fixture::new();
        let mut events = vec![Event::TextMessageStart {
            message_id: "m1".into(),
            role: Role::Assistant,
        }];
        events.push(Event::TextMessageContent {
            message_id: "m1".into(),
            delta: "Let me add that.".into(),
        });
        events.push(Event::TextMessageEnd {
            message_id: "m1".into(),
        });
        events.extend(tool_call("call-2", "add_proverb", r#"{"proverb":"Soap saves."}"#));
        events.push(Event::ToolCallResult {
            message_id: "res-2".into(),
            tool_call_id: "call-2".into(),
            content: "added".into(),
        });
        events.push(Event::TextMessageChunk {
            message_id: Some("m2".into()),
            delta: Some("Added a proverb about soap.".into()),
        });
        let outcome = fx.run(events);

        let shape: Vec<(Role, Option<&str>)> = outcome
            .messages
            .iter()
            .map(|m| (m.role, m.id.as_deref()))
            .collect();
        assert_eq!(shape.len(), 4);
        assert_eq!(shape[0], (Role::Assistant, Some("m1")));
        assert!(outcome.messages[1].tool_calls.is_some());
        assert_eq!(shape[2], (Role::Tool, Some("res-2")));
        assert_eq!(shape[3], (Role::Assistant, Some("m2")));
        assert_eq!(outcome.messages[3].content, "Added a proverb about soap.");
    }

    #[test]
    fn test_tool_call_chunks() {
        let fx = Fixture::new();
        let outcome = fx.run(vec![
            Event::ToolCallChunk {
                tool_call_id: Some("c1".into()),
                tool_call_name: Some("set_theme".into()),
                delta: Some("{\"color\":".into()),
            },
            Event::ToolCallChunk {
                tool_call_id: None,
                tool_call_name: None,
                delta: Some("\"orange\"}".into()),
            },
        ]);
        assert_eq!(outcome.local_results, 1);
        assert_eq!(fx.calls()[0].args, json!({"color": "orange"}));
    }

    #[test]
    fn test_state_events() {
        let fx = Fixture::new();
        fx.run(vec![
            Event::StateSnapshot {
                snapshot: json!({"proverbs": ["a"]}),
            },
            Event::StateDelta {
                delta: vec![json!({"op": "add", "path": "/proverbs/-", "value": "b"})],
            },
            Event::StateDelta {
                delta: vec![json!({"op": "replace", "path": "/nope/0", "value": "c"})],
            },
        ]);
        assert_eq!(fx.state.agent_value(), Some(json!({"proverbs": ["a", "b"]})));
    }

    #[test]
    fn test_run_error_recorded() {
        let fx = Fixture::new();
        let outcome = fx.run(vec![
            Event::RunError {
                message: "model overloaded".into(),
                code: None,
            },
            Event::Unknown,
        ]);
        assert!(outcome.finished);
        assert_eq!(outcome.error.as_deref(), Some("model overloaded"));
        assert!(matches!(
            &fx.transcript.read()[0],
            TranscriptEntry::Error { message, .. } if message == "model overloaded"
        ));
        assert_eq!(outcome.events, 2);
    }
}
