//! chat — the dashboard assistant
//!
//! A thin request/response client for the generative-language
//! `generateContent` endpoint. Every failure is turned into one of a few
//! fixed replies; callers always get a `String` back.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::ChatConfig;
use crate::robot::{Robot, RobotSettings, RobotState, SystemStats};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta/models";

pub const NOT_CONFIGURED_REPLY: &str =
    "API key is not configured. Please check your environment settings.";
pub const COMMUNICATION_ERROR_REPLY: &str =
    "An error occurred while communicating with the AI core.";
pub const NO_RESPONSE_REPLY: &str = "No response received.";
pub const GREETING: &str =
    "Blue Vision AI core online. All systems nominal. How can I help you?";

/// What the assistant is told about the robot.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    pub stats: SystemStats,
    pub state: RobotState,
    pub settings: RobotSettings,
}

impl TelemetrySnapshot {
    pub fn from_robot(robot: &Robot) -> Self {
        Self {
            stats: robot.stats.clone(),
            state: robot.state,
            settings: robot.settings.clone(),
        }
    }
}

pub fn system_instruction(snapshot: &TelemetrySnapshot) -> String {
    let stats = &snapshot.stats;
    format!(
        "You are the AI hub assistant of the \"Blue Vision\" shoe-organizing robot.\n\
         Be professional, efficient and a little futuristic.\n\
         \n\
         Current telemetry:\n\
         - State: {}\n\
         - Battery level: {:.1}%\n\
         - Internal temperature: {:.1}°C\n\
         - Shoes organized today: {}\n\
         - Storage used: {}%\n\
         - Movement speed setting: {}%\n\
         \n\
         You may answer questions about the robot's status, give maintenance advice, \
         or explain how the system works (vision recognition, mecanum-wheel drive and so on).\n\
         Keep answers short, suitable for a dashboard command console.",
        snapshot.state,
        stats.battery_level,
        stats.temperature,
        stats.daily_shoes_organized,
        stats.storage_capacity,
        snapshot.settings.movement_speed(),
    )
}

// ── Wire format ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub system_instruction: Content,
    pub contents: Vec<Content>,
}

impl GenerateRequest {
    pub fn new(system: String, user_text: &str) -> Self {
        Self {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: system }],
            },
            contents: vec![Content {
                role: Some("user".into()),
                parts: vec![Part {
                    text: user_text.to_string(),
                }],
            }],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl GenerateResponse {
    /// Concatenated text of the first candidate.
    pub fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default()
    }
}

// ── Transport ────────────────────────────────────────────────────────────────

pub trait ChatTransport {
    fn generate(&self, api_key: &str, request: &GenerateRequest) -> Result<GenerateResponse>;
}

/// Blocking HTTPS transport.
pub struct HttpTransport {
    agent: ureq::Agent,
    url: String,
}

impl HttpTransport {
    pub fn new(config: &ChatConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        let url = format!(
            "{}/{}:generateContent",
            config.endpoint.trim_end_matches('/'),
            config.model
        );
        Self { agent, url }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl ChatTransport for HttpTransport {
    fn generate(&self, api_key: &str, request: &GenerateRequest) -> Result<GenerateResponse> {
        let body = serde_json::to_value(request).context("failed to encode chat request")?;
        let response = self
            .agent
            .post(&self.url)
            .set("x-goog-api-key", api_key)
            .send_json(body)
            .with_context(|| format!("POST {} failed", self.url))?;
        response
            .into_json::<GenerateResponse>()
            .context("failed to decode chat response")
    }
}

// ── Client ───────────────────────────────────────────────────────────────────

pub struct ChatClient {
    api_key: Option<String>,
    transport: Box<dyn ChatTransport + Send + Sync>,
}

impl ChatClient {
    /// An empty key counts as no key.
    pub fn new(config: &ChatConfig, api_key: Option<String>) -> Self {
        Self::with_transport(api_key, HttpTransport::new(config))
    }

    pub fn with_transport<T>(api_key: Option<String>, transport: T) -> Self
    where
        T: ChatTransport + Send + Sync + 'static,
    {
        let api_key = api_key.filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            warn!("no chat API key configured; assistant replies are disabled");
        }
        Self {
            api_key,
            transport: Box::new(transport),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn ask(&self, user_text: &str, snapshot: &TelemetrySnapshot) -> String {
        let Some(key) = self.api_key.as_deref() else {
            return NOT_CONFIGURED_REPLY.to_string();
        };

        let request = GenerateRequest::new(system_instruction(snapshot), user_text);
        match self.transport.generate(key, &request) {
            Ok(response) => {
                let text = response.text();
                if text.trim().is_empty() {
                    debug!("assistant returned an empty reply");
                    NO_RESPONSE_REPLY.to_string()
                } else {
                    text
                }
            }
            Err(e) => {
                error!("chat request failed: {e:#}");
                COMMUNICATION_ERROR_REPLY.to_string()
            }
        }
    }
}

// ── History ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl Default for ChatHistory {
    fn default() -> Self {
        Self {
            messages: vec![ChatMessage {
                role: Role::Model,
                text: GREETING.to_string(),
            }],
        }
    }
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Record the user's message, ask the assistant, and record its reply.
    /// Blank input is ignored.
    pub fn send(
        &mut self,
        client: &ChatClient,
        user_text: &str,
        snapshot: &TelemetrySnapshot,
    ) -> Option<&str> {
        if user_text.trim().is_empty() {
            return None;
        }
        self.messages.push(ChatMessage {
            role: Role::User,
            text: user_text.to_string(),
        });
        let reply = client.ask(user_text, snapshot);
        self.messages.push(ChatMessage {
            role: Role::Model,
            text: reply,
        });
        self.messages.last().map(|m| m.text.as_str())
    }
}
