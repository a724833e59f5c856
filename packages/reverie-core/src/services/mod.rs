//! Application services layer.
//!
//! Services that sit between the API/hub layer and the outside world:
//! GPU lifecycle (presence tracking, pod control, orchestrator client) and
//! generation-state persistence.

pub mod orchestrator;
pub mod pod;
pub mod presence;
pub mod state_store;

pub use orchestrator::{AdminApiOrchestrator, DisabledOrchestrator, Orchestrator};
pub use pod::{PodController, PodState, PodStatusReport, PodTransition};
pub use presence::{PodLifecycle, PresenceSnapshot, PresenceTracker};
pub use state_store::{StateInfo, StateStore};
