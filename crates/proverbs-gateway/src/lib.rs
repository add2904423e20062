//! HTTP gateway relaying AG-UI runs to remote agents.
//!
//! The gateway owns no conversation logic: it resolves the configured agent,
//! forwards the request body to it, and streams the agent's response back
//! byte for byte.

pub mod agents;
pub mod error;
pub mod middleware;
pub mod relay;
pub mod server;
pub mod state;

pub use agents::{AgentRegistry, HttpAgent, RemoteAgent};
pub use server::{gateway_router, start_gateway};
pub use state::GatewayState;
