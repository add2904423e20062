//! The Proverbs page: a themed proverb list plus the chat sidebar.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use proverbs_core::error::{ProverbsError, Result};

use crate::actions::{ActionDescriptor, ActionHandle, Availability, RenderProps, ToolCallStatus};
use crate::run::{ToolCallEntry, TranscriptEntry};
use crate::schema::Parameter;
use crate::session::SessionHost;
use crate::state::StateView;
use crate::theme::Theme;
use crate::view::View;

pub const PAGE_TITLE: &str = "Proverbs";
pub const TAGLINE: &str = "This is a demonstrative page, but it could be anything you want! 🪁";
pub const SIDEBAR_TITLE: &str = "Popup Assistant";
pub const INITIAL_PROVERB: &str = "CopilotKit may be new, but it's the best thing since sliced bread.";
pub const INITIAL_GREETING: &str = "👋 Hi, there! You're chatting with an agent. This agent comes with a few tools to get you started.

For example you can try:
- Frontend Tools: \"Set the theme to orange\"
- Backend Tools: \"Add a proverb about soap\", \"Remove the first proverb\"
- Generative UI: \"What is the weather like in San Francisco?\"";

/// Shape of the agent's shared state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    #[serde(default)]
    pub proverbs: Vec<String>,
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            proverbs: vec![INITIAL_PROVERB.to_string()],
        }
    }
}

/// A mounted Proverbs page.
pub struct ProverbsPage {
    host: Arc<SessionHost>,
    theme: Arc<Theme>,
    state: StateView<AgentState>,
    handles: Vec<ActionHandle>,
}

impl ProverbsPage {
    /// Subscribe to the agent's state and register the page's actions.
    pub fn mount(host: Arc<SessionHost>) -> Self {
        let theme = Arc::new(Theme::new(host.config().theme_color.clone()));
        let state = host.use_agent_state(host.agent(), AgentState::default());

        let set_theme = {
            let theme = theme.clone();
            ActionDescriptor::new("set_theme")
                .description("Set the theme color of the web page.")
                .parameter(
                    Parameter::string("color")
                        .describe("The hex color code to set as theme (e.g., #ff0000)"),
                )
                .handler(move |args: &Value| -> Result<Option<Value>> {
                    let color = args
                        .get("color")
                        .and_then(Value::as_str)
                        .ok_or_else(|| ProverbsError::Action("color is required".into()))?;
                    theme.set(color)?;
                    Ok(None)
                })
        };

        let get_weather = {
            let theme = theme.clone();
            ActionDescriptor::new("get_weather")
                .description("Get the weather for a given location.")
                .availability(Availability::Disabled)
                .parameter(Parameter::string("location"))
                .renderer(move |props: &RenderProps| {
                    weather_card(props.arg_str("location").unwrap_or(""), &theme.color())
                })
        };

        let handles = vec![host.register_action(set_theme), host.register_action(get_weather)];
        info!(agent = host.agent(), actions = handles.len(), "Proverbs page mounted");

        Self {
            host,
            theme,
            state,
            handles,
        }
    }

    /// Unregister the page's actions.
    pub fn unmount(self) {
        for handle in &self.handles {
            self.host.unregister_action(handle);
        }
        info!("Proverbs page unmounted");
    }

    pub fn host(&self) -> &Arc<SessionHost> {
        &self.host
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    pub fn theme_color(&self) -> String {
        self.theme.color()
    }

    pub fn proverbs(&self) -> Vec<String> {
        self.state.current().proverbs
    }

    pub fn state(&self) -> &StateView<AgentState> {
        &self.state
    }

    /// Render the whole page with the current theme, state, and transcript.
    pub fn render(&self) -> View {
        let theme = self.theme.color();
        View::el("main")
            .class("page")
            .style(format!("--copilot-kit-primary-color: {theme}"))
            .child(self.render_content(&theme))
            .child(self.render_sidebar())
    }

    fn render_content(&self, theme: &str) -> View {
        let cards = self
            .proverbs()
            .into_iter()
            .map(|proverb| {
                View::el("div")
                    .class("proverb-card")
                    .child(View::el("p").class("proverb").with_text(proverb))
            });

        View::el("div")
            .class("content")
            .style(format!("background-color: {theme}"))
            .child(
                View::el("div")
                    .class("panel")
                    .child(View::el("h1").class("title").with_text(PAGE_TITLE))
                    .child(View::el("p").class("tagline").with_text(TAGLINE))
                    .child(View::el("hr").class("rule"))
                    .child(View::el("div").class("proverbs").children(cards)),
            )
    }

    fn render_sidebar(&self) -> View {
        let entries = self
            .host
            .transcript()
            .into_iter()
            .map(|entry| self.render_entry(&entry));

        View::el("aside").class("sidebar").children([
            View::el("h2").class("sidebar-title").with_text(SIDEBAR_TITLE),
            View::el("div")
                .class("transcript")
                .child(View::el("div").class("message assistant initial").with_text(INITIAL_GREETING))
                .children(entries),
        ])
    }

    /// Transcript entries from `start` on, for incremental terminal output.
    pub fn render_transcript_since(&self, start: usize) -> View {
        let transcript = self.host.transcript();
        View::fragment(
            transcript
                .iter()
                .skip(start)
                .map(|entry| self.render_entry(entry)),
        )
    }

    fn render_entry(&self, entry: &TranscriptEntry) -> View {
        match entry {
            TranscriptEntry::User { text, .. } => View::el("div").class("message user").with_text(text.clone()),
            TranscriptEntry::Assistant { text, .. } => {
                View::el("div").class("message assistant").with_text(text.clone())
            }
            TranscriptEntry::Error { message, .. } => {
                View::el("div").class("message error").with_text(format!("Error: {message}"))
            }
            TranscriptEntry::ToolCall(call) => self.render_tool_call(call),
        }
    }

    /// A call renders through its action's renderer, else as nothing.
    fn render_tool_call(&self, call: &ToolCallEntry) -> View {
        let renderer = self
            .host
            .action(&call.name)
            .and_then(|action| action.renderer.clone());
        match renderer {
            Some(renderer) if call.status != ToolCallStatus::InProgress || !call.args.is_null() => {
                View::el("div")
                    .class("tool-call")
                    .attr("data-tool", call.name.clone())
                    .child(renderer.render(&call.render_props()))
            }
            _ => View::fragment([]),
        }
    }
}

/// Weather card for `get_weather` calls.
pub fn weather_card(location: &str, theme: &str) -> View {
    View::el("div")
        .class("weather-card")
        .style(format!("background-color: {theme}"))
        .child(View::el("h3").with_text(format!("Weather in {location}")))
        .child(View::el("p").with_text("Sunny, 72°F"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::session::CopilotConfig;

    fn page() -> ProverbsPage {
        ProverbsPage::mount(Arc::new(SessionHost::new(CopilotConfig::default())))
    }

    #[test]
    fn test_initial_render() {
        let page = page();
        let view = page.render();
        let html = view.to_html();

        assert!(html.contains("<h1 class=\"title\">Proverbs</h1>"));
        assert!(html.contains("background-color: #6366f1"));
        assert_eq!(view.find_all_by_class("proverb-card").len(), 1);
        assert_eq!(
            view.find_by_class("proverb").map(View::to_text).as_deref(),
            Some(INITIAL_PROVERB)
        );
        assert_eq!(
            view.find_by_class("sidebar-title").map(View::to_text).as_deref(),
            Some("Popup Assistant")
        );
        assert!(view.to_text().contains("Set the theme to orange"));
    }

    #[test]
    fn test_set_theme_rerenders_everything_themed() {
        let page = page();
        let action = page.host().action("set_theme").unwrap();
        let result = action
            .handler
            .as_ref()
            .unwrap()
            .invoke(&json!({"color": "#ff0000"}))
            .unwrap();
        assert!(result.is_none());
        assert_eq!(page.theme_color(), "#ff0000");

        let view = page.render();
        assert_eq!(view.get_attr("style"), Some("--copilot-kit-primary-color: #ff0000"));
        assert_eq!(
            view.find_by_class("content").and_then(|v| v.get_attr("style")),
            Some("background-color: #ff0000")
        );
        assert!(!view.to_html().contains("#6366f1"));
    }

    #[test]
    fn test_set_theme_rejects_style_declarations() {
        let page = page();
        let action = page.host().action("set_theme").unwrap();
        let result = action
            .handler
            .as_ref()
            .unwrap()
            .invoke(&json!({"color": "red; position: fixed; inset: 0"}));
        assert!(result.is_err());
        assert_eq!(page.theme_color(), "#6366f1");
        assert!(!page.render().to_html().contains("position: fixed"));
    }

    #[test]
    fn test_only_set_theme_is_offered() {
        let page = page();
        assert_eq!(page.host().offered_tools(), vec!["set_theme"]);
        let weather = page.host().action("get_weather").unwrap();
        assert!(!weather.is_enabled());
        assert!(weather.handler.is_none());
        assert!(weather.renderer.is_some());
    }

    #[test]
    fn test_weather_renderer_uses_theme() {
        let page = page();
        page.theme().set("#123456").unwrap();
        let weather = page.host().action("get_weather").unwrap();
        let view = weather.renderer.as_ref().unwrap().render(&RenderProps {
            name: "get_weather".into(),
            args: json!({"location": "San Francisco"}),
            status: ToolCallStatus::Executing,
            result: None,
        });
        assert_eq!(view.to_text(), "Weather in San Francisco\nSunny, 72°F");
        assert_eq!(view.get_attr("style"), Some("background-color: #123456"));
    }

    #[test]
    fn test_unmount_removes_actions() {
        let page = page();
        let host = page.host().clone();
        page.unmount();
        assert!(host.action("set_theme").is_none());
        assert!(host.action("get_weather").is_none());
    }

    #[test]
    fn test_transcript_since() {
        let page = page();
        assert_eq!(page.render_transcript_since(0).to_text(), "");
    }

    #[test]
    fn test_agent_state_default() {
        let state: AgentState = serde_json::from_value(json!({})).unwrap();
        assert!(state.proverbs.is_empty());
        assert_eq!(AgentState::default().proverbs, vec![INITIAL_PROVERB]);
    }
}
