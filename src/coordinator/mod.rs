//! Coordinator: dispatcher, liveness monitor and HTTP surface
//!
//! # Components
//!
//! - `CoordinatorState`: synchronous single-writer core
//! - `Coordinator`: async service with background sweeps and checkpoints
//! - `server`: axum routes for workers and operators

pub mod policy;
pub mod protocol;
pub mod server;
mod service;
mod state;

pub use policy::CoordinationPolicy;
pub use service::{Coordinator, RobotsSettings};
pub use state::{CoordinatorState, RobotsFetchRequest, SweepReport};
