// Gateway to the external conversational-agent service. The controller
// talks to the trait; the reqwest client below is the production wiring.

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::metrics;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Connect failure, timeout, or a dropped response body. Retryable.
    #[error("agent service request failed: {0}")]
    Transport(String),
    /// The stored agent id no longer resolves on the service.
    #[error("agent {0} no longer exists on the agent service")]
    AgentMissing(String),
    #[error("agent service returned {status}: {message}")]
    Service { status: u16, message: String },
    #[error("could not parse agent service response: {0}")]
    InvalidResponse(String),
}

/// Everything needed to provision one challenge agent.
#[derive(Debug, Clone)]
pub struct ProvisionSpec {
    pub name: String,
    pub system_prompt: String,
    pub tools: Vec<String>,
}

/// One reply turn from an agent: the text shown to the user plus every
/// tool name the agent invoked while producing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentTurn {
    pub text: String,
    pub tool_calls: Vec<String>,
}

impl AgentTurn {
    pub fn invoked(&self, tool: &str) -> bool {
        self.tool_calls.iter().any(|name| name == tool)
    }
}

#[async_trait]
pub trait AgentGateway: Send + Sync {
    /// Create the remote agent for a session, or re-attach to an existing
    /// agent carrying the same name. Returns the remote agent id.
    async fn provision(&self, spec: &ProvisionSpec) -> Result<String, AgentError>;

    /// Deliver one user message and collect the agent's reply turn.
    async fn send_message(&self, agent_ref: &str, text: &str) -> Result<AgentTurn, AgentError>;
}

/// Deterministic agent name for a session. Re-provisioning after a partial
/// failure finds the same name instead of leaking a second agent.
pub fn agent_name(user_id: i64, tournament_id: i64, challenge_id: i64) -> String {
    format!("u{user_id}-t{tournament_id}-c{challenge_id}")
}

// ── Wire types ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CreateAgentRequest<'a> {
    name: &'a str,
    model: &'a str,
    system: &'a str,
    tools: &'a [String],
    include_base_tools: bool,
}

#[derive(Debug, Deserialize)]
struct AgentInfo {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Serialize)]
struct OutgoingMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    messages: Vec<OutgoingMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    #[serde(default)]
    messages: Vec<AgentMessage>,
}

/// Reply stream entries, discriminated by `message_type`. Only assistant
/// text and tool invocations matter here; reasoning and tool-return
/// entries are skipped.
#[derive(Debug, Deserialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
enum AgentMessage {
    AssistantMessage {
        #[serde(default)]
        content: String,
    },
    ToolCallMessage {
        tool_call: ToolCallData,
    },
    ToolReturnMessage {},
    ReasoningMessage {},
    HiddenReasoningMessage {},
    SystemMessage {},
    UserMessage {},
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct ToolCallData {
    name: String,
}

fn collect_turn(response: SendMessageResponse) -> AgentTurn {
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();
    for message in response.messages {
        match message {
            AgentMessage::AssistantMessage { content } => {
                if !content.is_empty() {
                    text_parts.push(content);
                }
            }
            AgentMessage::ToolCallMessage { tool_call } => tool_calls.push(tool_call.name),
            _ => {}
        }
    }
    AgentTurn {
        text: text_parts.join("\n\n"),
        tool_calls,
    }
}

// ── HTTP client ───────────────────────────────────────────────────────

pub struct AgentServiceClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    model: String,
}

impl AgentServiceClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build agent service HTTP client");
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            model: model.into(),
        }
    }

    async fn get_json<Res: DeserializeOwned>(&self, path: &str) -> Result<Res, AgentError> {
        let request = self.client.get(format!("{}/{}", self.base_url, path));
        self.execute(request).await
    }

    async fn post_json<Req: Serialize, Res: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Res, AgentError> {
        let request = self
            .client
            .post(format!("{}/{}", self.base_url, path))
            .json(body);
        self.execute(request).await
    }

    async fn execute<Res: DeserializeOwned>(
        &self,
        mut request: reqwest::RequestBuilder,
    ) -> Result<Res, AgentError> {
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let started = Instant::now();
        let response = request.send().await;
        metrics::AGENT_REQUEST_DURATION_SECONDS.observe(started.elapsed().as_secs_f64());

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                metrics::AGENT_REQUESTS_TOTAL.with_label_values(&["error"]).inc();
                return Err(AgentError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        if !status.is_success() {
            metrics::AGENT_REQUESTS_TOTAL.with_label_values(&["error"]).inc();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "no response body".to_string());
            return Err(AgentError::Service {
                status: status.as_u16(),
                message,
            });
        }

        metrics::AGENT_REQUESTS_TOTAL.with_label_values(&["ok"]).inc();
        response
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl AgentGateway for AgentServiceClient {
    async fn provision(&self, spec: &ProvisionSpec) -> Result<String, AgentError> {
        // Look up by name first so a crash between agent creation and
        // session persistence re-attaches instead of leaking an agent.
        let existing: Vec<AgentInfo> = self
            .get_json(&format!("v1/agents/?name={}", spec.name))
            .await?;
        if let Some(agent) = existing.into_iter().find(|a| a.name == spec.name) {
            tracing::info!("reusing agent {} for {}", agent.id, spec.name);
            return Ok(agent.id);
        }

        let request = CreateAgentRequest {
            name: &spec.name,
            model: &self.model,
            system: &spec.system_prompt,
            tools: &spec.tools,
            include_base_tools: false,
        };
        let agent: AgentInfo = self.post_json("v1/agents/", &request).await?;
        tracing::info!("provisioned agent {} for {}", agent.id, spec.name);
        Ok(agent.id)
    }

    async fn send_message(&self, agent_ref: &str, text: &str) -> Result<AgentTurn, AgentError> {
        let request = SendMessageRequest {
            messages: vec![OutgoingMessage {
                role: "user",
                content: text,
            }],
        };
        let response: SendMessageResponse = match self
            .post_json(&format!("v1/agents/{agent_ref}/messages"), &request)
            .await
        {
            Ok(response) => response,
            Err(AgentError::Service { status: 404, .. }) => {
                return Err(AgentError::AgentMissing(agent_ref.to_string()));
            }
            Err(e) => return Err(e),
        };
        Ok(collect_turn(response))
    }
}

impl std::fmt::Debug for AgentServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentServiceClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
