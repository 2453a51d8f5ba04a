//! Link provisioning primitives.
//!
//! A [`LinkProvisioner`] creates the host-visible IPVLAN child of a master
//! interface, moves it into the pod's network namespace and reports the
//! hardware address the kernel gave it. It is the only part of the crate
//! that touches kernel networking state.

mod ip;

pub use ip::{IpLinkProvisioner, IpvlanLink};

use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::proto::{AddRequest, DelRequest};

/// Longest interface name the kernel accepts, without the trailing NUL.
pub const MAX_IFNAME_LEN: usize = libc::IFNAMSIZ - 1;

/// Errors raised while creating or removing links
#[derive(Debug, Error)]
pub enum LinkError {
    /// The `ip` binary could not be spawned
    #[error("failed to execute `{command}`: {source}")]
    Exec {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// `ip` ran but reported a failure
    #[error("`{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The configured master interface is absent on the host
    #[error("master interface {0} does not exist")]
    MasterNotFound(String),

    /// Entering or leaving a network namespace failed
    #[error("network namespace {path}: {source}")]
    Netns {
        path: String,
        #[source]
        source: nix::errno::Errno,
    },

    /// Interface name rejected before reaching the kernel
    #[error("invalid interface name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Malformed MAC address
    #[error("invalid MAC address '{0}'")]
    InvalidMac(String),

    /// Output of `ip -j` did not have the expected shape
    #[error("unexpected output from ip: {0}")]
    Parse(String),
}

impl LinkError {
    /// True when the kernel reported that the device does not exist
    pub fn is_missing_device(&self) -> bool {
        match self {
            LinkError::CommandFailed { stderr, .. } => is_missing_device(stderr),
            _ => false,
        }
    }
}

pub(crate) fn is_missing_device(stderr: &str) -> bool {
    stderr.contains("Cannot find device") || stderr.contains("does not exist")
}

/// IPVLAN operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpvlanMode {
    /// Bridged at the link layer
    L2,
    /// Routed at the IP layer
    #[default]
    L3,
    /// Routed, with netfilter symmetric hooks
    L3s,
}

impl IpvlanMode {
    /// Mode keyword as understood by `ip link add ... type ipvlan mode`
    pub fn as_str(&self) -> &'static str {
        match self {
            IpvlanMode::L2 => "l2",
            IpvlanMode::L3 => "l3",
            IpvlanMode::L3s => "l3s",
        }
    }
}

impl fmt::Display for IpvlanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IpvlanMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l2" => Ok(IpvlanMode::L2),
            "l3" => Ok(IpvlanMode::L3),
            "l3s" => Ok(IpvlanMode::L3s),
            other => Err(format!("unknown ipvlan mode '{other}' (expected l2, l3 or l3s)")),
        }
    }
}

/// Ethernet hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddr([u8; 6]);

impl MacAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.iter().map(|b| format!("{b:02x}")).join(":"))
    }
}

impl FromStr for MacAddr {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LinkError::InvalidMac(s.to_string());
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');

        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            if part.len() != 2 {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Reject names the kernel would refuse, before shelling out
pub fn validate_ifname(name: &str) -> Result<(), LinkError> {
    let invalid = |reason: &str| LinkError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_IFNAME_LEN {
        return Err(invalid(&format!("longer than {MAX_IFNAME_LEN} characters")));
    }
    if name == "." || name == ".." {
        return Err(invalid("reserved name"));
    }
    if name.chars().any(|c| c == '/' || c == ':' || c.is_whitespace()) {
        return Err(invalid("contains '/', ':' or whitespace"));
    }

    Ok(())
}

/// Creates and removes pod links.
///
/// Implementations block on kernel calls. A single provisioner may serve
/// several pods concurrently only if the underlying mechanism supports
/// concurrent creation on distinct namespaces.
pub trait LinkProvisioner: Send + Sync {
    /// Create an IPVLAN child of `master` for the pod described by `request`
    /// and return its hardware address. On error no link is left attached.
    fn create(
        &self,
        request: &AddRequest,
        master: &str,
        mode: IpvlanMode,
    ) -> Result<MacAddr, LinkError>;

    /// Remove the pod link. A link or namespace that is already gone is not
    /// an error.
    fn release(&self, request: &DelRequest) -> Result<(), LinkError>;
}
