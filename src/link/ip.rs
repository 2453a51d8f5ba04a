use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sched::{setns, CloneFlags};
use nix::sys::stat::Mode;
use nix::unistd::close;
use serde::Serialize;
use std::path::PathBuf;
use std::process::Command;
use tracing::{debug, info, warn};

use super::{is_missing_device, validate_ifname, IpvlanMode, LinkError, LinkProvisioner, MacAddr};
use crate::proto::{AddRequest, DelRequest};

/// Namespace handle of the calling thread; `setns` only moves one thread.
const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// IPVLAN link as reported by `ip -j -d link show type ipvlan`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpvlanLink {
    pub name: String,
    pub master: Option<String>,
    pub mode: Option<String>,
    pub state: String,
    pub mac: Option<String>,
}

/// Provisioner driving iproute2 and `setns(2)`
#[derive(Debug, Clone)]
pub struct IpLinkProvisioner {
    ip_bin: PathBuf,
}

impl Default for IpLinkProvisioner {
    fn default() -> Self {
        Self {
            ip_bin: PathBuf::from("ip"),
        }
    }
}

impl IpLinkProvisioner {
    /// Use a specific `ip` binary instead of the one on `PATH`
    pub fn with_ip_binary(ip_bin: impl Into<PathBuf>) -> Self {
        Self {
            ip_bin: ip_bin.into(),
        }
    }

    /// Run `ip` with `args`, returning stdout on success
    fn run_ip(&self, args: &[&str]) -> Result<Vec<u8>, LinkError> {
        let command = format!("{} {}", self.ip_bin.display(), args.join(" "));
        let output = Command::new(&self.ip_bin)
            .args(args)
            .output()
            .map_err(|source| LinkError::Exec {
                command: command.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(LinkError::CommandFailed {
                command,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }

    /// Check for a link in the current namespace
    fn link_present(&self, name: &str) -> Result<bool, LinkError> {
        match self.run_ip(&["link", "show", "dev", name]) {
            Ok(_) => Ok(true),
            Err(err) if err.is_missing_device() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Delete a link in the current namespace, ignoring a missing one
    fn delete_link(&self, name: &str) -> Result<(), LinkError> {
        match self.run_ip(&["link", "delete", "dev", name]) {
            Ok(_) => Ok(()),
            Err(err) if err.is_missing_device() => {
                debug!(link = name, "link already gone");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Delete a link we created, logging instead of failing
    fn discard_link(&self, name: &str) {
        if let Err(err) = self.delete_link(name) {
            warn!(link = name, error = %err, "failed to remove partially configured link");
        }
    }

    /// Rename, size and bring up the moved link, then read its address.
    /// Runs inside the pod namespace and removes the link again on failure.
    fn configure_pod_link(&self, host_if: &str, request: &AddRequest) -> Result<MacAddr, LinkError> {
        let ifname = request.interface_name.as_str();

        // Until the rename succeeds `ifname` is not ours
        if let Err(err) = self.run_ip(&["link", "set", "dev", host_if, "name", ifname]) {
            self.discard_link(host_if);
            return Err(err);
        }

        let configured = self.bring_up_pod_link(ifname, request.mtu);
        if configured.is_err() {
            self.discard_link(ifname);
        }
        configured
    }

    fn bring_up_pod_link(&self, ifname: &str, mtu: Option<u32>) -> Result<MacAddr, LinkError> {
        if let Some(mtu) = mtu {
            self.run_ip(&["link", "set", "dev", ifname, "mtu", &mtu.to_string()])?;
        }

        self.run_ip(&["link", "set", "dev", ifname, "up"])?;

        let stdout = self.run_ip(&["-j", "link", "show", "dev", ifname])?;
        parse_link_address(&stdout)
    }

    /// Whether `ifname` exists inside the namespace at `netns`
    pub fn link_exists(&self, netns: &str, ifname: &str) -> Result<bool, LinkError> {
        in_netns(netns, || self.link_present(ifname))
    }

    /// IPVLAN links in the current namespace, or in `netns` when given
    pub fn list_ipvlan_links(&self, netns: Option<&str>) -> Result<Vec<IpvlanLink>, LinkError> {
        let list = || {
            let stdout = self.run_ip(&["-j", "-d", "link", "show", "type", "ipvlan"])?;
            parse_ipvlan_links(&stdout)
        };

        match netns {
            Some(path) => in_netns(path, list),
            None => list(),
        }
    }
}

impl LinkProvisioner for IpLinkProvisioner {
    fn create(
        &self,
        request: &AddRequest,
        master: &str,
        mode: IpvlanMode,
    ) -> Result<MacAddr, LinkError> {
        validate_ifname(master)?;
        validate_ifname(&request.desired_host_interface_name)?;
        validate_ifname(&request.interface_name)?;

        if !self.link_present(master)? {
            return Err(LinkError::MasterNotFound(master.to_string()));
        }

        let host_if = request.desired_host_interface_name.as_str();
        info!(master, link = host_if, mode = %mode, "creating ipvlan link");

        self.run_ip(&[
            "link", "add", "link", master, "name", host_if, "type", "ipvlan", "mode",
            mode.as_str(),
        ])?;

        // Move interface to container namespace
        if let Err(err) = self.run_ip(&["link", "set", "dev", host_if, "netns", &request.netns]) {
            if let Err(cleanup) = self.delete_link(host_if) {
                warn!(link = host_if, error = %cleanup, "failed to remove ipvlan link after move failure");
            }
            return Err(err);
        }

        in_netns(&request.netns, || self.configure_pod_link(host_if, request))
    }

    fn release(&self, request: &DelRequest) -> Result<(), LinkError> {
        if !request.netns.is_empty() {
            let released = in_netns(&request.netns, || self.delete_link(&request.interface_name));
            match released {
                Err(LinkError::Netns {
                    source: Errno::ENOENT,
                    ..
                }) => debug!(netns = %request.netns, "network namespace already removed"),
                other => other?,
            }
        }

        // A create that failed before the move can leave the host-side link
        if !request.desired_host_interface_name.is_empty() {
            self.delete_link(&request.desired_host_interface_name)?;
        }

        Ok(())
    }
}

/// Execute a function inside a network namespace, restoring the calling
/// thread's namespace afterwards
fn in_netns<T, F>(netns_path: &str, f: F) -> Result<T, LinkError>
where
    F: FnOnce() -> Result<T, LinkError>,
{
    let netns_err = |path: &str| {
        let path = path.to_string();
        move |source: Errno| LinkError::Netns { path, source }
    };

    // Save the current network namespace
    let current_fd = open(THREAD_NETNS, OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty())
        .map_err(netns_err(THREAD_NETNS))?;

    let netns_fd = match open(netns_path, OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty()) {
        Ok(fd) => fd,
        Err(source) => {
            let _ = close(current_fd);
            return Err(netns_err(netns_path)(source));
        }
    };

    if let Err(source) = setns(netns_fd, CloneFlags::CLONE_NEWNET) {
        let _ = close(netns_fd);
        let _ = close(current_fd);
        return Err(netns_err(netns_path)(source));
    }

    let result = f();

    // Return to original namespace
    let restored = setns(current_fd, CloneFlags::CLONE_NEWNET);
    let _ = close(netns_fd);
    let _ = close(current_fd);
    restored.map_err(netns_err(THREAD_NETNS))?;

    result
}

/// Extract the hardware address from `ip -j link show dev <name>`
fn parse_link_address(stdout: &[u8]) -> Result<MacAddr, LinkError> {
    let links: Vec<serde_json::Value> = serde_json::from_slice(stdout)
        .map_err(|err| LinkError::Parse(format!("link show output is not JSON: {err}")))?;

    let address = links
        .first()
        .and_then(|link| link.get("address"))
        .and_then(|addr| addr.as_str())
        .ok_or_else(|| LinkError::Parse("link has no hardware address".to_string()))?;

    address.parse()
}

fn parse_ipvlan_links(stdout: &[u8]) -> Result<Vec<IpvlanLink>, LinkError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let links: Vec<serde_json::Value> = serde_json::from_slice(stdout)
        .map_err(|err| LinkError::Parse(format!("link show output is not JSON: {err}")))?;

    let as_string = |value: Option<&serde_json::Value>| {
        value.and_then(|v| v.as_str()).map(str::to_string)
    };

    Ok(links
        .iter()
        .filter_map(|link| {
            let name = as_string(link.get("ifname"))?;
            let info_data = link.get("linkinfo").and_then(|info| info.get("info_data"));
            Some(IpvlanLink {
                name,
                master: as_string(link.get("link")),
                mode: as_string(info_data.and_then(|data| data.get("mode"))),
                state: as_string(link.get("operstate")).unwrap_or_else(|| "UNKNOWN".to_string()),
                mac: as_string(link.get("address")),
            })
        })
        .collect())
}
