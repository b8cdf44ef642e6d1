//! Picks the specialist profile a new worker runs under.
//!
//! The worker accepts the chosen name as `--mode`. Routing asks the
//! completion service once per spawn; callers fall back to [`GENERALIST`]
//! when [`TaskRouter::route`] fails.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use crate::{ChatRequest, CompletionService, Message};

/// Specialist profiles the worker knows about.
pub const SPECIALISTS: &[&str] = &[
    "active-directory",
    "client-side-web",
    "enumeration",
    "linux-privesc",
    "shelling",
    "web-enumeration",
    "web",
    "windows-privesc",
];

/// Profile used when routing fails.
pub const GENERALIST: &str = "generalist";

const ROUTER_SYSTEM_PROMPT: &str =
    "You are a precise task routing system. Always respond with valid JSON.";

/// Why a task could not be routed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    /// The completion request failed.
    Completion(String),
    /// The reply was not `{"specialist": "..."}`.
    Malformed(String),
    /// The reply named a profile outside the known set.
    UnknownSpecialist(String),
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completion(e) => write!(f, "routing request failed: {e}"),
            Self::Malformed(e) => write!(f, "malformed routing reply: {e}"),
            Self::UnknownSpecialist(name) => write!(f, "unknown specialist '{name}'"),
        }
    }
}

impl std::error::Error for RouteError {}

#[derive(Deserialize)]
struct RouteReply {
    specialist: String,
}

/// Classifies task descriptions through an injected [`CompletionService`].
#[derive(Clone)]
pub struct TaskRouter {
    client: Arc<dyn CompletionService>,
    model: String,
    max_tokens: u32,
}

impl TaskRouter {
    pub fn new(client: Arc<dyn CompletionService>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens: 1_000,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build the one-shot routing request for a task.
    pub fn build_request(&self, task: &str) -> ChatRequest {
        let options = SPECIALISTS
            .iter()
            .map(|s| format!("- {s}"))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Pick the specialist best suited to the task below.\n\n\
             Specialists:\n{options}\n\n\
             Task:\n{task}\n\n\
             Respond with exactly one JSON object: {{\"specialist\": \"<name>\"}}"
        );
        ChatRequest {
            model: Some(self.model.clone()),
            messages: vec![Message::system(ROUTER_SYSTEM_PROMPT), Message::user(prompt)],
            max_tokens: self.max_tokens,
            ..Default::default()
        }
    }

    /// Ask which specialist should take `task`.
    pub async fn route(&self, task: &str) -> Result<String, RouteError> {
        let request = self.build_request(task);
        let completion = self
            .client
            .chat(&request)
            .await
            .map_err(RouteError::Completion)?;
        let content = completion.content.unwrap_or_default();
        debug!("Router reply: {content}");
        let name = parse_reply(&content)?;
        let preview: String = task.chars().take(100).collect();
        info!("Router selected {name} for: {preview}");
        Ok(name)
    }
}

/// Extract and check the specialist named in a routing reply. Accepts the
/// object bare or inside a fenced code block.
pub fn parse_reply(content: &str) -> Result<String, RouteError> {
    let body = content.trim();
    let body = body
        .strip_prefix("```json")
        .or_else(|| body.strip_prefix("```"))
        .unwrap_or(body);
    let body = body.strip_suffix("```").unwrap_or(body).trim();

    let reply: RouteReply =
        serde_json::from_str(body).map_err(|e| RouteError::Malformed(e.to_string()))?;
    let name = reply.specialist.trim();
    if SPECIALISTS.contains(&name) {
        Ok(name.to_string())
    } else {
        Err(RouteError::UnknownSpecialist(name.to_string()))
    }
}
