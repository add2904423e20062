//! Gateway shared state.

use std::sync::Arc;

use proverbs_core::config::Config;

use crate::agents::AgentRegistry;

/// Shared gateway state accessible from all handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub agents: Arc<AgentRegistry>,
    /// Runtime endpoint path, fixed at startup.
    pub endpoint: String,
}

impl GatewayState {
    pub fn new(config: Arc<Config>, agents: AgentRegistry) -> Self {
        let endpoint = config.endpoint();
        Self {
            config,
            agents: Arc::new(agents),
            endpoint,
        }
    }

    /// Build state with HTTP agents for every configured registration.
    pub fn from_config(config: Config) -> proverbs_core::error::Result<Self> {
        let agents = AgentRegistry::from_config(&config)?;
        Ok(Self::new(Arc::new(config), agents))
    }
}
