//! Unix socket client for the infra agent.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::protocol::{ErrorCode, Method, Request, Response};
use super::{InfraAgentClient, RequestContext, RpcError};
use crate::proto::{
    CreateNetworkReply, CreateNetworkRequest, DeleteNetworkReply, DeleteNetworkRequest,
};

/// Where the agent listens unless configured otherwise
pub const DEFAULT_AGENT_SOCKET: &str = "/var/run/infra/agent.sock";

/// Infra agent client.
///
/// Every call opens a fresh connection, writes one request line and reads
/// one response line. Calls are never retried here.
#[derive(Debug, Clone)]
pub struct AgentClient {
    socket_path: PathBuf,
}

impl AgentClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    async fn call<P, R>(&self, ctx: &RequestContext, method: Method, params: &P) -> Result<R, RpcError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let request = Request::new(method, params)?;
        debug!(method = %method, id = %request.id, socket = %self.socket_path.display(), "calling infra agent");

        let result = ctx.run(self.round_trip(&request)).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn round_trip(&self, request: &Request) -> Result<serde_json::Value, RpcError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|source| RpcError::Connect {
                path: self.socket_path.clone(),
                source,
            })?;

        let (reader, mut writer) = stream.into_split();

        writer.write_all(request.to_json_line()?.as_bytes()).await?;
        writer.flush().await?;

        let mut line = String::new();
        if BufReader::new(reader).read_line(&mut line).await? == 0 {
            return Err(RpcError::ConnectionClosed);
        }

        let response = Response::from_json(&line)?;
        if response.id() != request.id {
            return Err(RpcError::UnexpectedResponse {
                expected: request.id.clone(),
                got: response.id().to_string(),
            });
        }

        match response {
            Response::Ok { result, .. } => Ok(result),
            Response::Error {
                code: ErrorCode::Unimplemented,
                message,
                ..
            } => Err(RpcError::Unimplemented {
                method: request.method.to_string(),
                message,
            }),
            Response::Error { code, message, .. } => Err(RpcError::Agent { code, message }),
        }
    }
}

#[async_trait]
impl InfraAgentClient for AgentClient {
    async fn create_network(
        &self,
        ctx: &RequestContext,
        request: CreateNetworkRequest,
    ) -> Result<CreateNetworkReply, RpcError> {
        self.call(ctx, Method::CreateNetwork, &request).await
    }

    async fn delete_network(
        &self,
        ctx: &RequestContext,
        request: DeleteNetworkRequest,
    ) -> Result<DeleteNetworkReply, RpcError> {
        self.call(ctx, Method::DeleteNetwork, &request).await
    }
}
