//! Infra offload CNI plugin for Kubernetes
//!
//! This implementation provides a pure Rust CNI plugin that:
//! - Creates an IPVLAN child of a master interface for each pod
//! - Moves it into the pod's network namespace
//! - Tells a remote infra agent to program the offloaded dataplane
//! - Reverses both steps on pod deletion
//!
//! The interface technology sits behind the [`PodInterface`] contract so
//! other variants can share the same orchestration.

pub mod agent;
pub mod commands;
pub mod config;
pub mod error;
pub mod link;
pub mod netconf;
pub mod proto;
pub mod state;
pub mod types;

// Re-export commonly used items
pub use agent::{AgentClient, InfraAgentClient, RequestContext};
pub use commands::{cmd_add, cmd_check, cmd_del, run_cni};
pub use config::NetConf;
pub use error::{Error, Result};
pub use netconf::{new_pod_interface, InterfaceInfo, IpvlanPodInterface, PodInterface};
