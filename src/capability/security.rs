//! Security review capability.

use crate::capability::model::{numbered_listing, ChatMessage, ModelClient, ReviewReply};
use crate::capability::{AnalysisInput, AnalysisOutput, Capability, CapabilityError, StepContext};
use crate::models::Category;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

const SYSTEM_PROMPT: &str = r#"You are a rigorous application security reviewer. You receive one source file and respond with a single JSON object, no prose before or after it.

Focus on: injection (SQL, command, template), broken authentication or authorization, secrets committed to code, weak or misused cryptography, unsafe deserialization, path traversal, and server-side request forgery.

Respond with exactly this shape:
{
  "summary": "<one sentence on the overall security posture>",
  "findings": [
    {
      "issue_type": "<snake_case label, e.g. sql_injection>",
      "severity": "critical|high|medium|low|info",
      "title": "<short title>",
      "description": "<what is wrong and why it matters>",
      "line_start": <first affected line number>,
      "line_end": <last affected line number>,
      "code_snippet": "<the offending code>",
      "suggestion": "<how to address it>",
      "confidence": <0.0 to 1.0>
    }
  ],
  "fixes": [
    {
      "finding_index": <index into findings>,
      "original_code": "<code to replace>",
      "proposed_code": "<replacement code>",
      "explanation": "<why this resolves the finding>",
      "confidence": <0.0 to 1.0>
    }
  ]
}

Report only issues you can point at a specific line for. An empty findings array is a valid answer. Line numbers refer to the numbered listing you are given."#;

/// Reviews a file for exploitable security problems.
pub struct SecurityCapability {
    client: Arc<ModelClient>,
}

impl SecurityCapability {
    pub fn new(client: Arc<ModelClient>) -> Self {
        Self { client }
    }

    fn user_prompt(input: &AnalysisInput, ctx: &StepContext) -> String {
        let mut prompt = String::new();
        if !ctx.upstream_failures.is_empty() {
            prompt.push_str(&format!(
                "Note: upstream steps [{}] failed, so their results are unavailable.\n\n",
                ctx.upstream_failures.join(", ")
            ));
        }
        prompt.push_str(&format!(
            "Review `{}` for security issues:\n\n{}",
            input.filename,
            numbered_listing(&input.code)
        ));
        prompt
    }
}

#[async_trait]
impl Capability for SecurityCapability {
    fn capability_id(&self) -> &str {
        "security"
    }

    fn description(&self) -> &str {
        "Security review: injection, auth, crypto, secrets"
    }

    async fn analyze(
        &self,
        input: &AnalysisInput,
        ctx: &StepContext,
    ) -> Result<AnalysisOutput, CapabilityError> {
        if input.code.trim().is_empty() {
            return Err(CapabilityError::InvalidInput(format!(
                "{} is empty",
                input.filename
            )));
        }

        debug!(
            review = %ctx.review_id,
            model = self.client.model(),
            "security analysis starting"
        );
        ctx.emit.thinking(&format!(
            "reviewing {} ({} lines) for security issues",
            input.filename,
            input.line_count()
        ));

        let messages = [
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user(Self::user_prompt(input, ctx)),
        ];
        let reply = self.client.chat(&messages).await?;
        let parsed = ReviewReply::parse(&reply)?;

        ctx.emit.thinking(&format!(
            "model reported {} candidate security findings",
            parsed.findings.len()
        ));

        Ok(parsed.into_output(Category::Security, &input.filename, &ctx.step_id, &ctx.emit))
    }
}
