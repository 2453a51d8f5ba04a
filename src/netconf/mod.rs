//! Pod interface contract.
//!
//! Every interface technology the plugin can attach to a pod implements
//! [`PodInterface`]. The variant is picked once from configuration by
//! [`new_pod_interface`]; callers only ever see the trait object.

pub mod ipvlan;

pub use ipvlan::IpvlanPodInterface;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::Span;

use crate::agent::{InfraAgentClient, RequestContext};
use crate::error::{Error, Result};
use crate::link::{IpvlanMode, LinkProvisioner, MacAddr};
use crate::proto::{AddReply, AddRequest, DelReply, DelRequest};

/// Identity of a freshly created pod interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceInfo {
    pub mac_addr: MacAddr,
    /// Host interface the pod link hangs off
    pub interface_name: String,
}

/// Interface technologies known to the plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    #[default]
    Ipvlan,
    Tap,
    Sriov,
}

impl InterfaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceType::Ipvlan => "ipvlan",
            InterfaceType::Tap => "tap",
            InterfaceType::Sriov => "sriov",
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ipvlan" => Ok(InterfaceType::Ipvlan),
            "tap" => Ok(InterfaceType::Tap),
            "sriov" => Ok(InterfaceType::Sriov),
            other => Err(Error::InvalidConfig(format!("unknown interface type '{other}'"))),
        }
    }
}

/// Settings a variant is built from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub interface_type: InterfaceType,
    /// Host interface pod links are attached to
    pub master: String,
    pub mode: IpvlanMode,
}

/// Provisioning contract for one pod's interface.
///
/// A value is bound to a single pod lifecycle and its operations must be
/// serialized by the caller. Distinct values are independent.
#[async_trait]
pub trait PodInterface: fmt::Debug + Send + Sync {
    /// Create the local link for the pod in `request`
    fn create_pod_interface(&self, request: &AddRequest) -> Result<InterfaceInfo>;

    /// Remove the local link. A link that was never created is reported
    /// however the provisioning primitive reports it.
    fn release_pod_interface(&self, request: &DelRequest) -> Result<()>;

    /// Ask the agent to program the network for a created interface. The
    /// agent's verdict is returned as-is.
    async fn setup_network(
        &self,
        ctx: &RequestContext,
        client: &dyn InfraAgentClient,
        interface: &InterfaceInfo,
        request: &AddRequest,
    ) -> Result<AddReply>;

    /// Ask the agent to tear the network down
    async fn release_network(
        &self,
        ctx: &RequestContext,
        client: &dyn InfraAgentClient,
        request: &DelRequest,
    ) -> Result<DelReply>;
}

/// Build the variant selected by `config`
pub fn new_pod_interface(
    config: &InterfaceConfig,
    provisioner: Arc<dyn LinkProvisioner>,
    span: Span,
) -> Result<Box<dyn PodInterface>> {
    match config.interface_type {
        InterfaceType::Ipvlan => Ok(Box::new(
            IpvlanPodInterface::new(config.master.clone(), provisioner, span).with_mode(config.mode),
        )),
        other @ (InterfaceType::Tap | InterfaceType::Sriov) => {
            Err(Error::UnsupportedInterfaceType(other.to_string()))
        }
    }
}
