use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::DEFAULT_AGENT_SOCKET;
use crate::error::{Error, Result};
use crate::link::{validate_ifname, IpvlanMode};
use crate::netconf::{InterfaceConfig, InterfaceType};
use crate::types::{Result as CniResult, SUPPORTED_VERSIONS};

/// Plugin type name as written in network configurations
pub const PLUGIN_TYPE: &str = "infra-cni";

/// Name of the conflist written by [`Installer`]
pub const CONFLIST_NAME: &str = "10-infra-cni.conflist";

const DEFAULT_AGENT_TIMEOUT_SECS: u64 = 10;

/// Installation defaults for the plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDefaults {
    /// Path to the CNI bin directory
    pub cni_bin_dir: PathBuf,
    /// Path to the CNI config directory
    pub cni_conf_dir: PathBuf,
    /// Default master interface for pod links
    pub default_master: String,
    /// Default IPVLAN mode
    pub default_mode: IpvlanMode,
    /// Default MTU for pod interfaces
    pub default_mtu: Option<u32>,
    /// Infra agent socket
    pub agent_socket: PathBuf,
}

impl Default for PluginDefaults {
    fn default() -> Self {
        Self {
            cni_bin_dir: PathBuf::from("/opt/cni/bin"),
            cni_conf_dir: PathBuf::from("/etc/cni/net.d"),
            default_master: "ens801f0".to_string(),
            default_mode: IpvlanMode::L3,
            default_mtu: None,
            agent_socket: PathBuf::from(DEFAULT_AGENT_SOCKET),
        }
    }
}

fn default_agent_socket() -> PathBuf {
    PathBuf::from(DEFAULT_AGENT_SOCKET)
}

fn default_agent_timeout_secs() -> u64 {
    DEFAULT_AGENT_TIMEOUT_SECS
}

/// Network configuration for the infra CNI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetConf {
    /// CNI specification version
    #[serde(rename = "cniVersion")]
    pub cni_version: String,
    /// Name of the network
    pub name: String,
    /// Type of CNI plugin
    #[serde(rename = "type")]
    pub plugin_type: String,
    /// Interface technology attached to pods
    #[serde(rename = "interfaceType", default)]
    pub interface_type: InterfaceType,
    /// Master interface pod links are attached to
    pub master: String,
    /// IPVLAN mode
    #[serde(default)]
    pub mode: IpvlanMode,
    /// Interface MTU
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
    /// Infra agent socket
    #[serde(rename = "agentSocket", default = "default_agent_socket")]
    pub agent_socket: PathBuf,
    /// Deadline for each agent call
    #[serde(rename = "agentTimeoutSecs", default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
    /// Result of the previous plugin in the chain (IPAM)
    #[serde(rename = "prevResult", default, skip_serializing_if = "Option::is_none")]
    pub prev_result: Option<CniResult>,
}

impl NetConf {
    /// Parse NetConf from bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let conf: NetConf = serde_json::from_slice(bytes)
            .map_err(|err| Error::InvalidConfig(format!("failed to parse network configuration: {err}")))?;

        // Validation
        if !SUPPORTED_VERSIONS.contains(&conf.cni_version.as_str()) {
            return Err(Error::IncompatibleVersion(conf.cni_version));
        }

        if conf.master.is_empty() {
            return Err(Error::InvalidConfig("master interface name is required".to_string()));
        }
        validate_ifname(&conf.master).map_err(|err| Error::InvalidConfig(err.to_string()))?;

        if let Some(mtu) = conf.mtu {
            if !(68..=65535).contains(&mtu) {
                return Err(Error::InvalidConfig(format!(
                    "invalid MTU {mtu} (must be between 68 and 65535)"
                )));
            }
        }

        if conf.agent_timeout_secs == 0 {
            return Err(Error::InvalidConfig("agentTimeoutSecs must be positive".to_string()));
        }

        Ok(conf)
    }

    /// Create a default configuration for a master interface
    pub fn new_default(name: &str, master: &str, mode: IpvlanMode, mtu: Option<u32>) -> Self {
        Self {
            cni_version: "1.0.0".to_string(),
            name: name.to_string(),
            plugin_type: PLUGIN_TYPE.to_string(),
            interface_type: InterfaceType::Ipvlan,
            master: master.to_string(),
            mode,
            mtu,
            agent_socket: default_agent_socket(),
            agent_timeout_secs: DEFAULT_AGENT_TIMEOUT_SECS,
            prev_result: None,
        }
    }

    /// Settings for building the pod interface variant
    pub fn interface_config(&self) -> InterfaceConfig {
        InterfaceConfig {
            interface_type: self.interface_type,
            master: self.master.clone(),
            mode: self.mode,
        }
    }

    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write network configuration to {}", path.display()))?;
        Ok(())
    }
}

/// Network configuration list holding the plugin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetConfList {
    #[serde(rename = "cniVersion")]
    pub cni_version: String,
    pub name: String,
    pub plugins: Vec<NetConf>,
}

impl NetConfList {
    /// Wrap a single plugin configuration
    pub fn single(conf: NetConf) -> Self {
        Self {
            cni_version: conf.cni_version.clone(),
            name: conf.name.clone(),
            plugins: vec![conf],
        }
    }
}

/// Installer for the infra CNI plugin
pub struct Installer {
    config: PluginDefaults,
}

impl Installer {
    /// Create a new installer
    pub fn new(config: PluginDefaults) -> Self {
        Self { config }
    }

    /// Create the CNI directories and write the default conflist.
    /// Returns the path of the written file.
    pub fn install(&self, network_name: &str) -> anyhow::Result<PathBuf> {
        for dir in [&self.config.cni_bin_dir, &self.config.cni_conf_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }

        let mut conf = NetConf::new_default(
            network_name,
            &self.config.default_master,
            self.config.default_mode,
            self.config.default_mtu,
        );
        conf.agent_socket = self.config.agent_socket.clone();

        let config_path = self.config.cni_conf_dir.join(CONFLIST_NAME);
        let json = serde_json::to_string_pretty(&NetConfList::single(conf))?;
        fs::write(&config_path, json)
            .with_context(|| format!("Failed to write CNI config to {}", config_path.display()))?;

        Ok(config_path)
    }
}
