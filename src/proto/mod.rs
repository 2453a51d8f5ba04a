//! Messages exchanged between the CNI plugin and the infra agent.
//!
//! Field names follow the agent's camelCase JSON schema. Sequences are
//! never absent on the wire: a missing `containerIps` decodes as empty.

use serde::{Deserialize, Serialize};

/// One container address with its gateway
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfiguration {
    /// Address with prefix length, e.g. `10.0.0.5/24`
    pub address: String,
    /// Gateway address, empty when none
    #[serde(default)]
    pub gateway: String,
}

impl IpConfiguration {
    pub fn new(address: impl Into<String>, gateway: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            gateway: gateway.into(),
        }
    }
}

/// Pod network add event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddRequest {
    pub container_id: String,
    /// Path of the pod's network namespace
    pub netns: String,
    /// Interface name inside the pod
    pub interface_name: String,
    /// Name the link carries on the host side
    pub desired_host_interface_name: String,
    #[serde(default)]
    pub container_ips: Vec<IpConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
}

impl AddRequest {
    /// Delete request undoing this add
    pub fn del_request(&self) -> DelRequest {
        DelRequest {
            container_id: self.container_id.clone(),
            netns: self.netns.clone(),
            interface_name: self.interface_name.clone(),
            desired_host_interface_name: self.desired_host_interface_name.clone(),
            container_ips: self.container_ips.clone(),
        }
    }
}

/// Pod network delete event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelRequest {
    pub container_id: String,
    pub netns: String,
    pub interface_name: String,
    pub desired_host_interface_name: String,
    #[serde(default)]
    pub container_ips: Vec<IpConfiguration>,
}

/// Result of a pod network add as seen by the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddReply {
    pub successful: bool,
    /// Set only when `successful` is false
    #[serde(default)]
    pub error_message: String,
}

/// Result of a pod network delete as seen by the orchestrator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelReply {
    pub successful: bool,
    #[serde(default)]
    pub error_message: String,
}

/// Agent call: program the offloaded network for a new pod interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNetworkRequest {
    #[serde(default)]
    pub container_ips: Vec<IpConfiguration>,
    pub host_if_name: String,
    pub desired_host_interface_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNetworkReply {
    pub successful: bool,
    #[serde(default)]
    pub error_message: String,
}

/// Agent call: tear down what [`CreateNetworkRequest`] programmed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNetworkRequest {
    #[serde(default)]
    pub container_ips: Vec<IpConfiguration>,
    pub host_if_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNetworkReply {
    pub successful: bool,
    #[serde(default)]
    pub error_message: String,
}
