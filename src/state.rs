//! Per-pod interface lifecycle.
//!
//! ```text
//!   Unprovisioned ──Created──▶ LocalReady ──NetworkSetUp──▶ NetworkReady
//!        │                        │                             │
//!   CreateFailed          NetworkSetupFailed       InterfaceReleased / NetworkReleased
//!        ▼                        ▼                             ▼
//!      Failed              PartiallyReady             ReleasingNetwork / ReleasingInterface
//!                                 │                             │
//!                        InterfaceReleased               the other release
//!                                 ▼                             ▼
//!                              Released ◀───────────────────────┘
//! ```
//!
//! The state machine only records what happened. Whether a partially ready
//! pod is rolled back is the orchestrator's decision.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodInterfaceState {
    #[default]
    Unprovisioned,
    /// Local link exists, agent not yet told
    LocalReady,
    NetworkReady,
    /// Local link exists, agent setup failed
    PartiallyReady,
    /// Network released, local link still present
    ReleasingInterface,
    /// Local link released, network still programmed
    ReleasingNetwork,
    Failed,
    Released,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PodInterfaceEvent {
    Created,
    CreateFailed,
    NetworkSetUp,
    NetworkSetupFailed,
    InterfaceReleased,
    NetworkReleased,
}

impl PodInterfaceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodInterfaceState::Failed | PodInterfaceState::Released)
    }

    /// Whether a local link is believed to exist
    pub fn has_local_interface(&self) -> bool {
        matches!(
            self,
            PodInterfaceState::LocalReady
                | PodInterfaceState::NetworkReady
                | PodInterfaceState::PartiallyReady
                | PodInterfaceState::ReleasingInterface
        )
    }

    /// Next state after `event`
    pub fn apply(self, event: PodInterfaceEvent) -> Result<Self> {
        use PodInterfaceEvent as E;
        use PodInterfaceState as S;

        let next = match (self, event) {
            (S::Unprovisioned, E::Created) => S::LocalReady,
            (S::Unprovisioned, E::CreateFailed) => S::Failed,
            (S::LocalReady, E::NetworkSetUp) => S::NetworkReady,
            (S::LocalReady, E::NetworkSetupFailed) => S::PartiallyReady,
            (S::NetworkReady, E::InterfaceReleased) => S::ReleasingNetwork,
            (S::NetworkReady, E::NetworkReleased) => S::ReleasingInterface,
            (S::ReleasingNetwork, E::NetworkReleased) => S::Released,
            (S::ReleasingInterface, E::InterfaceReleased) => S::Released,
            (S::PartiallyReady, E::InterfaceReleased) => S::Released,
            (state, event) => return Err(Error::InvalidTransition { state, event }),
        };

        Ok(next)
    }
}
