//! The offgrid interception agent.
//!
//! This crate provides the network client, the request router, generation
//! lifecycle management, deferred mutation delivery, and the state machine
//! that ties them together. Stores come from `offgrid-core` and are injected,
//! so every component can run against in-memory SQLite or a test double.

pub mod agent;
pub mod lifecycle;
pub mod net;
pub mod queue;
pub mod router;

pub use agent::{Agent, AgentEvent, AgentHandle, AgentState, AgentStatus};
pub use lifecycle::{ActivationReport, InstallReport, LifecycleManager};
pub use net::{HttpNetwork, Network, NetworkConfig};
pub use queue::{DeferredQueue, DrainReport};
pub use router::{Classification, GenerationView, ResponseSource, RoutePolicy, Routed, Router, classify};
