//! Remote infra agent access.
//!
//! The agent programs the offloaded dataplane. This crate only notifies it;
//! what the agent does with a request is its own business, and an agent
//! answering `successful: false` is a normal reply rather than an error.

pub mod client;
pub mod protocol;

pub use client::{AgentClient, DEFAULT_AGENT_SOCKET};
pub use protocol::ErrorCode;

use async_trait::async_trait;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::proto::{
    CreateNetworkReply, CreateNetworkRequest, DeleteNetworkReply, DeleteNetworkRequest,
};

/// Transport-level failures reaching the agent
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to connect to infra agent at {}: {source}", path.display())]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("infra agent call exceeded its deadline")]
    DeadlineExceeded,

    #[error("I/O error talking to infra agent: {0}")]
    Io(#[from] std::io::Error),

    #[error("infra agent message encoding: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("infra agent closed the connection without replying")]
    ConnectionClosed,

    #[error("infra agent does not implement {method}: {message}")]
    Unimplemented { method: String, message: String },

    #[error("infra agent error ({code}): {message}")]
    Agent { code: ErrorCode, message: String },

    #[error("unexpected response: expected id {expected}, got {got}")]
    UnexpectedResponse { expected: String, got: String },
}

impl RpcError {
    /// Failures a later retry may clear
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RpcError::Connect { .. }
                | RpcError::DeadlineExceeded
                | RpcError::ConnectionClosed
                | RpcError::Io(_)
        )
    }
}

/// Caller-supplied deadline for agent calls.
///
/// There is no timeout inside the contract itself; an in-flight call is
/// abandoned only when the context's deadline passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContext {
    deadline: Option<Instant>,
}

impl RequestContext {
    /// No deadline
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Drive `call` to completion or abort it at the deadline
    pub async fn run<T, F>(&self, call: F) -> Result<T, RpcError>
    where
        F: Future<Output = Result<T, RpcError>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, call)
                .await
                .map_err(|_| RpcError::DeadlineExceeded)?,
            None => call.await,
        }
    }
}

/// Calls the pod interface contract makes on the infra agent
#[async_trait]
pub trait InfraAgentClient: Send + Sync {
    async fn create_network(
        &self,
        ctx: &RequestContext,
        request: CreateNetworkRequest,
    ) -> Result<CreateNetworkReply, RpcError>;

    async fn delete_network(
        &self,
        ctx: &RequestContext,
        request: DeleteNetworkRequest,
    ) -> Result<DeleteNetworkReply, RpcError>;
}
