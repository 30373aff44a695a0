//! reqwest-backed peer client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode, Url};
use tracing::debug;

use super::{AgentApi, API_PREFIX};
use crate::domain::{
    ErrorReason, ExecutionState, InstructionAck, Instructions, Phase, SyncError, SyncResult,
};

const USER_AGENT: &str = concat!("rolesync/", env!("CARGO_PKG_VERSION"));
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for a single peer's API.
#[derive(Debug, Clone)]
pub struct HttpAgentClient {
    agent_id: String,
    host: String,
    base: Url,
    request_timeout: Duration,
    http_client: reqwest::Client,
}

impl HttpAgentClient {
    /// Build a client for `host:port`. IPv6 literals are bracketed.
    pub fn new(
        agent_id: impl Into<String>,
        host: &str,
        port: u16,
        request_timeout: Duration,
    ) -> SyncResult<Self> {
        let agent_id = agent_id.into();
        let authority = if host.contains(':') && !host.starts_with('[') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };
        let base = Url::parse(&format!("http://{authority}/")).map_err(|e| {
            SyncError::Config(format!("invalid address for agent '{agent_id}': {e}"))
        })?;

        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            agent_id,
            host: host.to_string(),
            base,
            request_timeout,
            http_client,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    fn url(&self, segments: &[&str]) -> SyncResult<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url.path_segments_mut().map_err(|_| {
                SyncError::Config(format!("base address {} cannot carry a path", self.base))
            })?;
            path.pop_if_empty().push(API_PREFIX).extend(segments);
        }
        Ok(url)
    }

    fn transport_error(&self, phase: Phase, err: reqwest::Error) -> SyncError {
        if err.is_decode() {
            SyncError::InvalidResponse {
                peer: self.host.clone(),
                phase,
                detail: err.to_string(),
            }
        } else {
            SyncError::Unreachable {
                peer: self.host.clone(),
                phase,
                detail: err.to_string(),
            }
        }
    }

    async fn status_error(&self, phase: Phase, response: Response) -> SyncError {
        let status = response.status();
        let mut detail = response.text().await.unwrap_or_default();
        if detail.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !detail.is_char_boundary(cut) {
                cut -= 1;
            }
            detail.truncate(cut);
        }
        SyncError::Api {
            peer: self.host.clone(),
            phase,
            status: status.as_u16(),
            reason: ErrorReason::HttpNonSuccessResponse,
            detail,
        }
    }
}

#[async_trait]
impl AgentApi for HttpAgentClient {
    fn agent_id(&self) -> &str {
        &self.agent_id
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn base_address(&self) -> String {
        self.base.as_str().trim_end_matches('/').to_string()
    }

    async fn heartbeat(&self) -> SyncResult<()> {
        let phase = Phase::ConfirmingPeer;
        let response = self
            .http_client
            .get(self.url(&["heartbeat"])?)
            .send()
            .await
            .map_err(|e| self.transport_error(phase, e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.status_error(phase, response).await)
        }
    }

    async fn server_online(&self) -> SyncResult<()> {
        let phase = Phase::ConfirmingPeer;
        let response = self
            .http_client
            .head(self.url(&["events"])?)
            .send()
            .await
            .map_err(|e| self.transport_error(phase, e))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.status_error(phase, response).await)
        }
    }

    async fn send_instructions(&self, instructions: &Instructions) -> SyncResult<InstructionAck> {
        let phase = Phase::DispatchingInstructions;
        debug!(peer = %self.host, instructions = %instructions.describe(), "POST instructions");

        let response = self
            .http_client
            .post(self.url(&["instructions"])?)
            .json(instructions)
            .send()
            .await
            .map_err(|e| self.transport_error(phase, e))?;

        if !response.status().is_success() {
            return Err(self.status_error(phase, response).await);
        }
        response
            .json::<InstructionAck>()
            .await
            .map_err(|e| self.transport_error(phase, e))
    }

    async fn get_state(&self, state_id: &str) -> SyncResult<Option<ExecutionState>> {
        let phase = Phase::PollingForCompletion;
        let response = self
            .http_client
            .get(self.url(&["state", state_id])?)
            .send()
            .await
            .map_err(|e| self.transport_error(phase, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => response
                .json::<ExecutionState>()
                .await
                .map(Some)
                .map_err(|e| self.transport_error(phase, e)),
            _ => Err(self.status_error(phase, response).await),
        }
    }

    async fn delete_state(&self, state_id: &str) -> SyncResult<()> {
        let phase = Phase::CleaningUp;
        let response = self
            .http_client
            .delete(self.url(&["state", state_id])?)
            .send()
            .await
            .map_err(|e| self.transport_error(phase, e))?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(self.status_error(phase, response).await)
        }
    }
}
