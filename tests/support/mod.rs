//! Test doubles for the provisioning primitive and the infra agent.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

use infra_cni::agent::protocol::Request;
use infra_cni::agent::{InfraAgentClient, RequestContext, RpcError};
use infra_cni::link::{IpvlanMode, LinkError, LinkProvisioner, MacAddr};
use infra_cni::proto::{
    AddRequest, CreateNetworkReply, CreateNetworkRequest, DelRequest, DeleteNetworkReply,
    DeleteNetworkRequest, IpConfiguration,
};

pub const FAKE_MAC: MacAddr = MacAddr::new([0x3c, 0xfd, 0xfe, 0x00, 0x00, 0x01]);
pub const MASTER: &str = "ens801f0";

/// Calls seen by [`FakeProvisioner`]
#[derive(Debug, Clone, PartialEq)]
pub enum LinkCall {
    Create {
        master: String,
        mode: IpvlanMode,
        link: String,
    },
    Release {
        netns: String,
        link: String,
    },
}

/// In-memory provisioner keyed by netns and interface name
#[derive(Default)]
pub struct FakeProvisioner {
    pub fail_create: bool,
    /// Report a missing link on release instead of succeeding
    pub strict_release: bool,
    pub links: Mutex<HashSet<(String, String)>>,
    pub calls: Mutex<Vec<LinkCall>>,
}

impl FakeProvisioner {
    pub fn failing() -> Self {
        Self {
            fail_create: true,
            ..Default::default()
        }
    }

    pub fn strict() -> Self {
        Self {
            strict_release: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<LinkCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn link_count(&self) -> usize {
        self.links.lock().unwrap().len()
    }
}

impl LinkProvisioner for FakeProvisioner {
    fn create(&self, request: &AddRequest, master: &str, mode: IpvlanMode) -> Result<MacAddr, LinkError> {
        self.calls.lock().unwrap().push(LinkCall::Create {
            master: master.to_string(),
            mode,
            link: request.interface_name.clone(),
        });

        if self.fail_create {
            return Err(LinkError::CommandFailed {
                command: format!("ip link add link {master} name {} type ipvlan", request.desired_host_interface_name),
                stderr: "RTNETLINK answers: Operation not permitted".to_string(),
            });
        }

        self.links
            .lock()
            .unwrap()
            .insert((request.netns.clone(), request.interface_name.clone()));
        Ok(FAKE_MAC)
    }

    fn release(&self, request: &DelRequest) -> Result<(), LinkError> {
        self.calls.lock().unwrap().push(LinkCall::Release {
            netns: request.netns.clone(),
            link: request.interface_name.clone(),
        });

        let removed = self
            .links
            .lock()
            .unwrap()
            .remove(&(request.netns.clone(), request.interface_name.clone()));

        if !removed && self.strict_release {
            return Err(LinkError::CommandFailed {
                command: format!("ip link delete dev {}", request.interface_name),
                stderr: format!("Cannot find device \"{}\"", request.interface_name),
            });
        }
        Ok(())
    }
}

/// How [`FakeAgent`] answers
#[derive(Debug, Clone)]
pub enum AgentBehavior {
    Accept,
    Reject(String),
    Unreachable,
    Unimplemented,
}

pub struct FakeAgent {
    pub behavior: AgentBehavior,
    pub created: Mutex<Vec<CreateNetworkRequest>>,
    pub deleted: Mutex<Vec<DeleteNetworkRequest>>,
}

impl FakeAgent {
    pub fn new(behavior: AgentBehavior) -> Self {
        Self {
            behavior,
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn created(&self) -> Vec<CreateNetworkRequest> {
        self.created.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<DeleteNetworkRequest> {
        self.deleted.lock().unwrap().clone()
    }

    fn verdict(&self, method: &str) -> Result<(bool, String), RpcError> {
        match &self.behavior {
            AgentBehavior::Accept => Ok((true, String::new())),
            AgentBehavior::Reject(message) => Ok((false, message.clone())),
            AgentBehavior::Unreachable => Err(RpcError::Connect {
                path: "/nonexistent/agent.sock".into(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            }),
            AgentBehavior::Unimplemented => Err(RpcError::Unimplemented {
                method: method.to_string(),
                message: "not supported by this agent".to_string(),
            }),
        }
    }
}

#[async_trait]
impl InfraAgentClient for FakeAgent {
    async fn create_network(
        &self,
        _ctx: &RequestContext,
        request: CreateNetworkRequest,
    ) -> Result<CreateNetworkReply, RpcError> {
        self.created.lock().unwrap().push(request);
        let (successful, error_message) = self.verdict("create_network")?;
        Ok(CreateNetworkReply { successful, error_message })
    }

    async fn delete_network(
        &self,
        _ctx: &RequestContext,
        request: DeleteNetworkRequest,
    ) -> Result<DeleteNetworkReply, RpcError> {
        self.deleted.lock().unwrap().push(request);
        let (successful, error_message) = self.verdict("delete_network")?;
        Ok(DeleteNetworkReply { successful, error_message })
    }
}

/// Accept one connection, hand the request to `respond` and write back the
/// line it returns. `None` keeps the connection open without answering.
pub fn serve_once<F>(listener: UnixListener, respond: F) -> JoinHandle<Request>
where
    F: FnOnce(&Request) -> Option<String> + Send + 'static,
{
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let (reader, mut writer) = stream.into_split();

        let mut line = String::new();
        BufReader::new(reader).read_line(&mut line).await.expect("read request");
        let request = Request::from_json(&line).expect("decode request");

        match respond(&request) {
            Some(reply) => {
                writer.write_all(reply.as_bytes()).await.expect("write reply");
                writer.flush().await.expect("flush");
            }
            None => tokio::time::sleep(std::time::Duration::from_secs(3600)).await,
        }

        request
    })
}

/// The add request used across the contract tests
pub fn sample_add_request() -> AddRequest {
    AddRequest {
        container_id: "4f3c0b8a1d2e".to_string(),
        netns: "/var/run/netns/pod1".to_string(),
        interface_name: "eth0".to_string(),
        desired_host_interface_name: "eth-pod1".to_string(),
        container_ips: vec![IpConfiguration::new("10.0.0.5/24", "10.0.0.1")],
        mtu: None,
    }
}
