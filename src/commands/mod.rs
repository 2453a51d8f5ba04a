use anyhow::{Context, Result};
use ipnetwork::IpNetwork;
use itertools::Itertools;
use std::collections::HashMap;
use std::env;
use std::io::{self, Read};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{debug, info, info_span, warn};

use crate::agent::{AgentClient, InfraAgentClient, RequestContext, RpcError};
use crate::config::NetConf;
use crate::error::Error;
use crate::link::{IpLinkProvisioner, MAX_IFNAME_LEN};
use crate::netconf::{new_pod_interface, PodInterface};
use crate::proto::{AddRequest, DelRequest, IpConfiguration};
use crate::state::{PodInterfaceEvent, PodInterfaceState};
use crate::types::{
    uses_ip_version_field, CmdArgs, IPConfig, Interface, Result as CniResult,
    ERR_INCOMPATIBLE_VERSION, ERR_INVALID_CONFIG, ERR_PLUGIN, ERR_TRY_AGAIN_LATER,
};

pub use crate::types::SUPPORTED_VERSIONS;

const HOST_IF_PREFIX: &str = "ipv";

/// Parse command arguments from environment
pub fn parse_args(command: &str) -> Result<CmdArgs> {
    // Get required environment variables
    let container_id = env::var("CNI_CONTAINERID")
        .context("CNI_CONTAINERID not found in environment")?;

    // DEL may arrive after the namespace is gone
    let netns = match env::var("CNI_NETNS") {
        Ok(netns) => netns,
        Err(_) if command == "DEL" => String::new(),
        Err(err) => return Err(err).context("CNI_NETNS not found in environment"),
    };

    let ifname = env::var("CNI_IFNAME")
        .context("CNI_IFNAME not found in environment")?;

    let path = env::var("CNI_PATH").unwrap_or_default();

    // Get args (if any)
    let args_str = env::var("CNI_ARGS").unwrap_or_default();
    let args = parse_cni_args(&args_str);

    // Read stdin data
    let mut stdin_data = Vec::new();
    io::stdin().read_to_end(&mut stdin_data)
        .context("Failed to read from stdin")?;

    Ok(CmdArgs {
        container_id,
        netns,
        ifname,
        args,
        path,
        stdin_data,
    })
}

/// Parse CNI_ARGS string into key-value pairs
pub fn parse_cni_args(args_str: &str) -> HashMap<String, String> {
    args_str
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Host-side link name for a pod interface.
///
/// Stable for a container/interface pair and short enough for the kernel.
pub fn host_interface_name(container_id: &str, ifname: &str) -> String {
    let digest = ring::digest::digest(
        &ring::digest::SHA256,
        format!("{container_id}/{ifname}").as_bytes(),
    );
    let hex_len = MAX_IFNAME_LEN - HOST_IF_PREFIX.len();
    let hex = digest
        .as_ref()
        .iter()
        .map(|b| format!("{b:02x}"))
        .join("");
    format!("{HOST_IF_PREFIX}{}", &hex[..hex_len])
}

fn prev_ips(conf: &NetConf) -> impl Iterator<Item = &IPConfig> + '_ {
    conf.prev_result
        .as_ref()
        .and_then(|prev| prev.ips.as_ref())
        .into_iter()
        .flatten()
}

fn container_ip(ip: &IPConfig) -> crate::Result<IpConfiguration> {
    ip.address.parse::<IpNetwork>().map_err(|err| {
        Error::InvalidRequest(format!("invalid container address '{}': {err}", ip.address))
    })?;
    if let Some(gateway) = &ip.gateway {
        gateway.parse::<IpAddr>().map_err(|err| {
            Error::InvalidRequest(format!("invalid gateway '{gateway}': {err}"))
        })?;
    }
    Ok(IpConfiguration::new(
        ip.address.clone(),
        ip.gateway.clone().unwrap_or_default(),
    ))
}

/// Container addresses handed over by the IPAM plugin earlier in the chain
pub fn container_ips(conf: &NetConf) -> crate::Result<Vec<IpConfiguration>> {
    prev_ips(conf).map(container_ip).collect()
}

/// Add request for the pod described by `args`
pub fn build_add_request(conf: &NetConf, args: &CmdArgs) -> crate::Result<AddRequest> {
    if args.netns.is_empty() {
        return Err(Error::InvalidRequest("network namespace is required for ADD".to_string()));
    }

    Ok(AddRequest {
        container_id: args.container_id.clone(),
        netns: args.netns.clone(),
        interface_name: args.ifname.clone(),
        desired_host_interface_name: host_interface_name(&args.container_id, &args.ifname),
        container_ips: container_ips(conf)?,
        mtu: conf.mtu,
    })
}

/// Delete request for the pod described by `args`.
///
/// Malformed addresses are skipped so teardown still runs.
pub fn build_del_request(conf: &NetConf, args: &CmdArgs) -> DelRequest {
    let container_ips = prev_ips(conf)
        .filter_map(|ip| match container_ip(ip) {
            Ok(ip) => Some(ip),
            Err(err) => {
                warn!(error = %err, "skipping container address on delete");
                None
            }
        })
        .collect();

    DelRequest {
        container_id: args.container_id.clone(),
        netns: args.netns.clone(),
        interface_name: args.ifname.clone(),
        desired_host_interface_name: host_interface_name(&args.container_id, &args.ifname),
        container_ips,
    }
}

/// Remove the local link after a failed setup
fn roll_back(
    pod_interface: &dyn PodInterface,
    request: &AddRequest,
    state: PodInterfaceState,
) -> PodInterfaceState {
    match pod_interface.release_pod_interface(&request.del_request()) {
        Ok(()) => state
            .apply(PodInterfaceEvent::InterfaceReleased)
            .unwrap_or(state),
        Err(err) => {
            warn!(error = %err, "failed to roll back pod interface");
            state
        }
    }
}

/// Provision the pod interface and the offloaded network.
///
/// If the agent cannot be reached or rejects the setup, the local link is
/// released again so ADD leaves nothing behind.
pub async fn add_network(
    conf: &NetConf,
    args: &CmdArgs,
    pod_interface: &dyn PodInterface,
    client: &dyn InfraAgentClient,
) -> Result<CniResult> {
    let request = build_add_request(conf, args)?;
    let ctx = RequestContext::with_timeout(conf.agent_timeout());
    let mut state = PodInterfaceState::default();

    let interface = match pod_interface.create_pod_interface(&request) {
        Ok(interface) => {
            state = state.apply(PodInterfaceEvent::Created)?;
            interface
        }
        Err(err) => {
            state = state.apply(PodInterfaceEvent::CreateFailed)?;
            debug!(?state, "pod interface creation failed");
            return Err(err).context("Failed to create pod interface");
        }
    };

    let reply = match pod_interface
        .setup_network(&ctx, client, &interface, &request)
        .await
    {
        Ok(reply) => reply,
        Err(err) => {
            state = state.apply(PodInterfaceEvent::NetworkSetupFailed)?;
            state = roll_back(pod_interface, &request, state);
            debug!(?state, "network setup failed");
            return Err(err).context("Failed to set up pod network");
        }
    };

    if !reply.successful {
        state = state.apply(PodInterfaceEvent::NetworkSetupFailed)?;
        state = roll_back(pod_interface, &request, state);
        debug!(?state, "network setup rejected");
        anyhow::bail!("Infra agent rejected network setup: {}", reply.error_message);
    }

    state = state.apply(PodInterfaceEvent::NetworkSetUp)?;
    info!(?state, mac = %interface.mac_addr, master = %interface.interface_name, "pod network ready");

    let mut result = CniResult::new(&conf.cni_version);
    let index = result.add_interface(Interface {
        name: args.ifname.clone(),
        mac: Some(interface.mac_addr.to_string()),
        sandbox: Some(args.netns.clone()),
    });

    let legacy = uses_ip_version_field(&conf.cni_version);
    for ip in &request.container_ips {
        // Addresses were validated when the request was built
        let version = legacy.then(|| if ip.address.contains(':') { "6" } else { "4" }.to_string());

        result.add_ip(IPConfig {
            version,
            interface: Some(index),
            address: ip.address.clone(),
            gateway: (!ip.gateway.is_empty()).then(|| ip.gateway.clone()),
        });
    }

    if let Some(prev) = &conf.prev_result {
        result.routes = prev.routes.clone();
        result.dns = prev.dns.clone();
    }

    Ok(result)
}

/// Release the pod interface and the offloaded network.
///
/// Both steps are attempted; the first failure is returned. An agent that
/// answers but declines the teardown is logged, not failed, so DEL stays
/// idempotent.
pub async fn del_network(
    conf: &NetConf,
    args: &CmdArgs,
    pod_interface: &dyn PodInterface,
    client: &dyn InfraAgentClient,
) -> Result<()> {
    let request = build_del_request(conf, args);
    let ctx = RequestContext::with_timeout(conf.agent_timeout());
    let mut first_err = None;

    if let Err(err) = pod_interface.release_pod_interface(&request) {
        warn!(error = %err, "failed to release pod interface");
        first_err = Some(anyhow::Error::new(err).context("Failed to release pod interface"));
    }

    match pod_interface.release_network(&ctx, client, &request).await {
        Ok(reply) if reply.successful => debug!("network released"),
        Ok(reply) => warn!(error = %reply.error_message, "infra agent declined network teardown"),
        Err(err) => {
            warn!(error = %err, "failed to release network");
            if first_err.is_none() {
                first_err = Some(anyhow::Error::new(err).context("Failed to release pod network"));
            }
        }
    }

    match first_err {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Verify the pod interface is present
pub fn check_network(args: &CmdArgs, provisioner: &IpLinkProvisioner) -> Result<()> {
    let exists = provisioner
        .link_exists(&args.netns, &args.ifname)
        .context("Failed to inspect container network namespace")?;

    if !exists {
        anyhow::bail!("Interface {} does not exist in container", args.ifname);
    }

    Ok(())
}

/// CNI error code for a failed command
pub fn error_code(err: &anyhow::Error) -> u32 {
    for cause in err.chain() {
        if let Some(err) = cause.downcast_ref::<Error>() {
            return match err {
                Error::IncompatibleVersion(_) => ERR_INCOMPATIBLE_VERSION,
                Error::InvalidConfig(_) | Error::UnsupportedInterfaceType(_) => ERR_INVALID_CONFIG,
                err if err.is_transient() => ERR_TRY_AGAIN_LATER,
                _ => ERR_PLUGIN,
            };
        }
        if let Some(err) = cause.downcast_ref::<RpcError>() {
            return if err.is_transient() {
                ERR_TRY_AGAIN_LATER
            } else {
                ERR_PLUGIN
            };
        }
    }
    ERR_PLUGIN
}

fn pod_interface_for(conf: &NetConf, args: &CmdArgs) -> Result<Box<dyn PodInterface>> {
    let span = info_span!(
        "pod_interface",
        container_id = %args.container_id,
        ifname = %args.ifname,
        netns = %args.netns,
    );
    Ok(new_pod_interface(
        &conf.interface_config(),
        Arc::new(IpLinkProvisioner::default()),
        span,
    )?)
}

/// `setns` moves only the calling thread, so everything runs on this one
fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")
}

/// Execute the add command
pub fn cmd_add() -> Result<()> {
    let args = parse_args("ADD")?;

    // Parse network configuration
    let conf = NetConf::parse(&args.stdin_data)?;
    let pod_interface = pod_interface_for(&conf, &args)?;
    let client = AgentClient::new(&conf.agent_socket);

    let result = runtime()?.block_on(add_network(&conf, &args, pod_interface.as_ref(), &client))?;

    // Output result as JSON
    result.print()?;

    Ok(())
}

/// Execute the delete command
pub fn cmd_del() -> Result<()> {
    let args = parse_args("DEL")?;

    // Parse network configuration
    let conf = NetConf::parse(&args.stdin_data)?;
    let pod_interface = pod_interface_for(&conf, &args)?;
    let client = AgentClient::new(&conf.agent_socket);

    runtime()?.block_on(del_network(&conf, &args, pod_interface.as_ref(), &client))
}

/// Execute the check command
pub fn cmd_check() -> Result<()> {
    let args = parse_args("CHECK")?;

    // Parse network configuration
    NetConf::parse(&args.stdin_data)?;

    check_network(&args, &IpLinkProvisioner::default())
}

/// Version report printed for `VERSION`
pub fn version_info() -> serde_json::Value {
    serde_json::json!({
        "cniVersion": "1.0.0",
        "supportedVersions": SUPPORTED_VERSIONS,
    })
}

/// Main entry point for the CNI plugin
pub fn run_cni() -> Result<()> {
    // Get command from environment
    let cmd = env::var("CNI_COMMAND")
        .context("CNI_COMMAND not found in environment")?;

    // Execute the appropriate command
    match cmd.as_str() {
        "ADD" => cmd_add(),
        "DEL" => cmd_del(),
        "CHECK" => cmd_check(),
        "VERSION" => {
            println!("{}", version_info());
            Ok(())
        }
        _ => anyhow::bail!("Unknown CNI command: {}", cmd),
    }
}
