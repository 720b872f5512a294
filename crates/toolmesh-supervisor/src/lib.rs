//! Connection supervision for toolmesh servers.
//!
//! [`ConnectionSupervisor`] connects servers in priority order with retries
//! and capped exponential backoff, runs a periodic liveness probe for every
//! connected server, and publishes a status table the router reads.

mod actor;
/// Supervisor timing and queue settings.
pub mod settings;
mod state;
/// The supervisor itself.
pub mod supervisor;

pub use settings::SupervisorSettings;
pub use supervisor::ConnectionSupervisor;
