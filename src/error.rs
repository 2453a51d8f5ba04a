//! Error types for the pod interface contract.
//!
//! Two channels reach the caller. Failures (this enum) mean the operation
//! did not complete: the local link could not be provisioned, or the agent
//! could not be reached. An agent that was reached but declined the request
//! is not a failure; its verdict travels in the reply's `successful` flag.

use crate::agent::RpcError;
use crate::link::LinkError;
use crate::state::{PodInterfaceEvent, PodInterfaceState};

/// Result type alias for pod interface operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Local link could not be created or removed
    #[error(transparent)]
    Link(#[from] LinkError),

    /// The infra agent could not be reached or failed the call
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// `create_pod_interface` already succeeded on this handle
    #[error("pod interface already provisioned with MAC {0}")]
    AlreadyProvisioned(String),

    /// Interface technology known but not built into this plugin
    #[error("interface type '{0}' is not supported by this plugin")]
    UnsupportedInterfaceType(String),

    /// Network configuration rejected
    #[error("invalid network configuration: {0}")]
    InvalidConfig(String),

    /// `cniVersion` outside the versions this plugin emits results for
    #[error("CNI version {0} is not supported")]
    IncompatibleVersion(String),

    /// Request could not be built from CNI input
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Lifecycle event not allowed in the current state
    #[error("event {event:?} is not valid in state {state:?}")]
    InvalidTransition {
        state: PodInterfaceState,
        event: PodInterfaceEvent,
    },
}

impl Error {
    /// Transport failures that a later retry may clear
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Rpc(err) if err.is_transient())
    }
}
