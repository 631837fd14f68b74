use std::sync::Arc;

/// Shared application state for the HTTP control surface.
///
/// The controller owns the single-active-run slot; handlers only hold this
/// state and never touch the browser session directly.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<crate::core::config::PilotConfig>,
    pub controller: Arc<crate::automation::controller::AutomationController>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("api_gate_enabled", &self.config.resolve_require_api_key())
            .field("run_active", &self.controller.is_running())
            .finish()
    }
}

impl AppState {
    pub fn new(config: crate::core::config::PilotConfig) -> Self {
        let config = Arc::new(config);
        let controller = Arc::new(crate::automation::controller::AutomationController::new(
            Arc::clone(&config),
        ));
        Self { config, controller }
    }
}
