//! IPVLAN pod interface, routed (L3) mode by default.

use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info, warn, Instrument, Span};

use super::{InterfaceInfo, PodInterface};
use crate::agent::{InfraAgentClient, RequestContext};
use crate::error::{Error, Result};
use crate::link::{IpvlanMode, LinkProvisioner, MacAddr};
use crate::proto::{
    AddReply, AddRequest, CreateNetworkRequest, DelReply, DelRequest, DeleteNetworkRequest,
};

/// IPVLAN child of a master interface, moved into the pod namespace.
///
/// The MAC is written once, by the first successful
/// [`create_pod_interface`](PodInterface::create_pod_interface).
pub struct IpvlanPodInterface {
    span: Span,
    master: String,
    mode: IpvlanMode,
    provisioner: Arc<dyn LinkProvisioner>,
    pod_mac: OnceLock<MacAddr>,
}

impl IpvlanPodInterface {
    /// Unprovisioned handle attached to `master`, in L3 mode.
    ///
    /// Events are emitted inside `span`, so the caller decides where they go
    /// and which pod fields they carry.
    pub fn new(master: impl Into<String>, provisioner: Arc<dyn LinkProvisioner>, span: Span) -> Self {
        Self {
            span,
            master: master.into(),
            mode: IpvlanMode::L3,
            provisioner,
            pod_mac: OnceLock::new(),
        }
    }

    pub fn with_mode(mut self, mode: IpvlanMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn master(&self) -> &str {
        &self.master
    }

    pub fn mode(&self) -> IpvlanMode {
        self.mode
    }

    /// MAC of the pod link, once created
    pub fn pod_mac(&self) -> Option<MacAddr> {
        self.pod_mac.get().copied()
    }
}

impl fmt::Debug for IpvlanPodInterface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IpvlanPodInterface")
            .field("master", &self.master)
            .field("mode", &self.mode)
            .field("pod_mac", &self.pod_mac.get())
            .finish_non_exhaustive()
    }
}

/// Agent payload for a pod add. Addresses keep their order and values.
pub fn create_network_request(request: &AddRequest) -> CreateNetworkRequest {
    CreateNetworkRequest {
        container_ips: request.container_ips.clone(),
        host_if_name: request.desired_host_interface_name.clone(),
        desired_host_interface_name: request.desired_host_interface_name.clone(),
    }
}

/// Agent payload for a pod delete
pub fn delete_network_request(request: &DelRequest) -> DeleteNetworkRequest {
    DeleteNetworkRequest {
        container_ips: request.container_ips.clone(),
        host_if_name: request.desired_host_interface_name.clone(),
    }
}

#[async_trait]
impl PodInterface for IpvlanPodInterface {
    fn create_pod_interface(&self, request: &AddRequest) -> Result<InterfaceInfo> {
        let _entered = self.span.enter();

        if let Some(mac) = self.pod_mac.get() {
            return Err(Error::AlreadyProvisioned(mac.to_string()));
        }

        let mac = self
            .provisioner
            .create(request, &self.master, self.mode)
            .map_err(|err| {
                error!(
                    error = %err,
                    master = %self.master,
                    link = %request.desired_host_interface_name,
                    "failed to configure network interface"
                );
                err
            })?;

        self.pod_mac
            .set(mac)
            .map_err(|_| Error::AlreadyProvisioned(mac.to_string()))?;

        info!(master = %self.master, mac = %mac, "pod interface created");

        Ok(InterfaceInfo {
            mac_addr: mac,
            interface_name: self.master.clone(),
        })
    }

    fn release_pod_interface(&self, request: &DelRequest) -> Result<()> {
        let _entered = self.span.enter();
        debug!(link = %request.interface_name, netns = %request.netns, "releasing pod interface");
        Ok(self.provisioner.release(request)?)
    }

    async fn setup_network(
        &self,
        ctx: &RequestContext,
        client: &dyn InfraAgentClient,
        interface: &InterfaceInfo,
        request: &AddRequest,
    ) -> Result<AddReply> {
        let payload = create_network_request(request);

        async move {
            debug!(
                host_if = %payload.host_if_name,
                ips = payload.container_ips.len(),
                mac = %interface.mac_addr,
                "requesting network setup"
            );

            let out = client.create_network(ctx, payload).await.map_err(|err| {
                warn!(error = %err, "create_network call failed");
                err
            })?;

            Ok::<_, Error>(AddReply {
                successful: out.successful,
                error_message: out.error_message,
            })
        }
        .instrument(self.span.clone())
        .await
    }

    async fn release_network(
        &self,
        ctx: &RequestContext,
        client: &dyn InfraAgentClient,
        request: &DelRequest,
    ) -> Result<DelReply> {
        let payload = delete_network_request(request);

        async move {
            debug!(host_if = %payload.host_if_name, "requesting network teardown");

            let out = client.delete_network(ctx, payload).await.map_err(|err| {
                warn!(error = %err, "delete_network call failed");
                err
            })?;

            Ok::<_, Error>(DelReply {
                successful: out.successful,
                error_message: out.error_message,
            })
        }
        .instrument(self.span.clone())
        .await
    }
}
