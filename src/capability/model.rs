//! Ollama chat client and model-reply parsing.
//!
//! All capabilities talk to the model through this client. Requests are
//! non-streaming chat completions; replies are expected to carry one JSON
//! object, possibly wrapped in markdown fences or prose, which
//! [`ReviewReply::parse`] digs out and tolerantly deserializes.

use crate::capability::{AnalysisOutput, CapabilityError};
use crate::config::ModelConfig;
use crate::events::EmitHandle;
use crate::models::{short_id, Category, Finding, Fix, Location, Severity, VerificationStatus};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One message in a chat exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

/// Thin client over the Ollama chat API.
///
/// Carries no timeout of its own; the retry supervisor bounds each
/// attempt from the outside.
pub struct ModelClient {
    client: reqwest::Client,
    config: ModelConfig,
}

impl ModelClient {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Sends a chat request and returns the assistant's reply text.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String, CapabilityError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: self.config.temperature,
            },
        };

        let url = format!("{}/api/chat", self.config.ollama_url.trim_end_matches('/'));
        debug!(model = %self.config.model, %url, "sending chat request");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    CapabilityError::Connection(self.config.ollama_url.clone())
                } else {
                    CapabilityError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::Backend {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::Malformed(e.to_string()))?;
        Ok(parsed.message.content)
    }
}

/// Renders code with 1-based line numbers so the model can cite lines.
pub fn numbered_listing(code: &str) -> String {
    code.lines()
        .enumerate()
        .map(|(i, line)| format!("{:>4} | {}", i + 1, line))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Extracts the first balanced JSON object from `text`.
///
/// Scans from the first `{`, tracking string literals and escapes, and
/// returns the slice up to the matching `}`. Markdown fences and
/// surrounding prose fall away for free.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in text.as_bytes().iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Structured review reply as the model emits it.
///
/// Every field is defaulted: the model omitting a key degrades the reply
/// instead of failing the step.
#[derive(Debug, Default, Deserialize)]
pub struct ReviewReply {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<ReplyFinding>,
    #[serde(default)]
    pub fixes: Vec<ReplyFix>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReplyFinding {
    #[serde(default)]
    pub issue_type: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub line_start: u32,
    #[serde(default)]
    pub line_end: Option<u32>,
    #[serde(default)]
    pub code_snippet: Option<String>,
    #[serde(default)]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReplyFix {
    /// Index into the reply's `findings` array.
    #[serde(default)]
    pub finding_index: Option<usize>,
    #[serde(default)]
    pub original_code: Option<String>,
    #[serde(default)]
    pub proposed_code: String,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl ReviewReply {
    /// Parses a model reply, tolerating fences and leading prose.
    pub fn parse(text: &str) -> Result<Self, CapabilityError> {
        let block = extract_json_block(text)
            .ok_or_else(|| CapabilityError::Malformed("no JSON object in reply".to_string()))?;
        serde_json::from_str(block).map_err(|e| CapabilityError::Malformed(e.to_string()))
    }

    /// Converts the raw reply into engine findings and fixes, publishing
    /// a `finding_discovered` / `fix_proposed` event for each.
    ///
    /// Fixes that point at no finding or carry no code are dropped.
    pub fn into_output(
        self,
        category: Category,
        filename: &str,
        step_id: &str,
        emit: &EmitHandle,
    ) -> AnalysisOutput {
        let mut findings = Vec::with_capacity(self.findings.len());
        for raw in self.findings {
            let line_start = raw.line_start.max(1);
            let line_end = raw.line_end.unwrap_or(line_start).max(1);
            let finding = Finding {
                finding_id: short_id(),
                step_id: step_id.to_string(),
                category,
                issue_type: if raw.issue_type.is_empty() {
                    "general".to_string()
                } else {
                    raw.issue_type
                },
                severity: Severity::from(raw.severity.as_str()),
                title: raw.title,
                description: raw.description,
                location: Location::new(filename, line_start, line_end),
                code_snippet: raw.code_snippet,
                suggestion: raw.suggestion,
                confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
            };
            emit.finding_discovered(&finding);
            findings.push(finding);
        }

        let mut fixes = Vec::new();
        for raw in self.fixes {
            let Some(index) = raw.finding_index else {
                debug!("dropping fix without finding_index");
                continue;
            };
            let Some(finding) = findings.get(index) else {
                debug!(index, "dropping fix pointing at unknown finding");
                continue;
            };
            if raw.proposed_code.trim().is_empty() {
                debug!(index, "dropping fix without proposed code");
                continue;
            }
            let fix = Fix {
                fix_id: short_id(),
                finding_id: finding.finding_id.clone(),
                original_code: raw.original_code,
                proposed_code: raw.proposed_code,
                explanation: raw.explanation,
                confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
                verification_status: VerificationStatus::Pending,
            };
            emit.fix_proposed(&fix);
            fixes.push(fix);
        }

        let summary = if self.summary.is_empty() {
            format!("{} findings, {} fixes proposed", findings.len(), fixes.len())
        } else {
            self.summary
        };

        AnalysisOutput {
            findings,
            fixes,
            summary,
        }
    }
}
