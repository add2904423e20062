//! Client side of the Proverbs app.
//!
//! A [`SessionHost`] talks AG-UI to the runtime endpoint. Pages mount onto it,
//! subscribe to the agent's shared state and register frontend actions the
//! agent can call or that render inline in the chat.

pub mod actions;
pub mod page;
pub mod run;
pub mod schema;
pub mod session;
pub mod sse;
pub mod state;
pub mod theme;
pub mod view;

pub use actions::{ActionDescriptor, ActionHandle, ActionHandler, ActionRenderer, Availability};
pub use page::ProverbsPage;
pub use run::TranscriptEntry;
pub use schema::{ParamType, Parameter};
pub use session::{CopilotConfig, RunSummary, SessionHost};
pub use state::StateView;
pub use view::View;
