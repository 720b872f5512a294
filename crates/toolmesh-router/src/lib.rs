//! Tool call routing for toolmesh.
//!
//! [`ToolRouter`] picks a connected server from the supervisor's status
//! table, fails over once on error, and runs tool chains sequentially or in
//! parallel.

/// Tool chain execution.
pub mod chain;
/// Server selection and failover.
pub mod router;

pub use chain::is_complete;
pub use router::{ChainSettings, ToolRouter};
