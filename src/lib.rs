pub mod auth;
pub mod automation;
pub mod browser;
pub mod content;
pub mod core;
pub mod server;

// --- Primary core exports ---
pub use crate::core::types;
pub use crate::core::types::*;
pub use crate::core::AppState;

// --- Convenience paths for the binary and tests ---
pub use crate::automation::controller::{AutomationController, RunHandle};
pub use crate::automation::flow::{RunContext, RunError, StepFlow};
pub use crate::browser::driver::PageDriver;
pub use crate::browser::guard::PageGuard;
pub use crate::core::config::{load_pilot_config, PilotConfig};
