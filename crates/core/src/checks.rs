//! Criteria-checking collaborator: evaluates named checks against the tail
//! of the conversation and reports the ones the user's latest message failed.

use crate::generate::{Persona, parse_json_payload};
use crate::transcript::{CheckFailure, Message};
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

/// Failure of the check collaborator; like generation failures, propagated
/// unmodified and safe to retry because nothing was persisted.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("check provider call failed: {0}")]
    Provider(String),
    #[error("check provider returned an unusable payload: {0}")]
    InvalidResponse(String),
}

/// One named criterion to evaluate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSpec {
    pub id: String,
    pub criterion: String,
}

#[async_trait]
pub trait CheckEvaluator: Send + Sync {
    /// Evaluate `checks` against the window and return only the failing ones
    /// attributable to the user. An empty result means everything passed.
    async fn check(
        &self,
        user: &Persona,
        agent: &Persona,
        window: &[Message],
        checks: &[CheckSpec],
    ) -> Result<Vec<CheckFailure>, CheckError>;
}

#[derive(Deserialize)]
struct ReportedFailure {
    id: String,
    offender: String,
    reason: String,
}

#[derive(Deserialize)]
struct Analysis {
    failed_checks: Vec<ReportedFailure>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    sender: &'a str,
    message: &'a str,
}

/// [`CheckEvaluator`] backed by an OpenAI-compatible chat-completions API.
pub struct OpenAiCheckEvaluator {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCheckEvaluator {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl CheckEvaluator for OpenAiCheckEvaluator {
    async fn check(
        &self,
        user: &Persona,
        agent: &Persona,
        window: &[Message],
        checks: &[CheckSpec],
    ) -> Result<Vec<CheckFailure>, CheckError> {
        if checks.is_empty() {
            return Ok(Vec::new());
        }
        let provider = |e: async_openai::error::OpenAIError| CheckError::Provider(e.to_string());

        let check_list = serde_json::to_string(checks)
            .map_err(|e| CheckError::InvalidResponse(e.to_string()))?;
        let system = format!(
            "You are a social skills coach. Your task is to analyze the following \
             conversation between {user} (the user) and {agent}, and determine whether \
             the latest message sent by {user} passes the provided checks. Here is the \
             list of checks that you should perform:\n{check_list}\nA check fails if \
             the user's message does not meet the criterion described in the check. \
             Provide a JSON object with the key 'failed_checks' containing a list of \
             objects with the keys 'id' (the id of the failed check), 'reason' (why \
             the check failed) and 'offender' (exactly '{user}'). If no checks fail, \
             provide an empty list. DO NOT perform any checks that are not listed \
             above.",
            user = user.name,
            agent = agent.name,
        );

        let wire: Vec<WireMessage<'_>> = window
            .iter()
            .map(|m| WireMessage {
                sender: &m.sender,
                message: &m.text,
            })
            .collect();
        let prompt =
            serde_json::to_string(&wire).map_err(|e| CheckError::InvalidResponse(e.to_string()))?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()
                    .map_err(provider)?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(prompt)
                    .build()
                    .map_err(provider)?
                    .into(),
            ])
            .build()
            .map_err(provider)?;

        let response = self.client.chat().create(request).await.map_err(provider)?;
        let raw = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| CheckError::InvalidResponse("no content in completion".into()))?;
        let analysis: Analysis =
            parse_json_payload(&raw).map_err(|e| CheckError::InvalidResponse(e.to_string()))?;

        let known: BTreeSet<&str> = checks.iter().map(|c| c.id.as_str()).collect();
        let mut failures = Vec::new();
        for reported in analysis.failed_checks {
            if !known.contains(reported.id.as_str()) {
                return Err(CheckError::InvalidResponse(format!(
                    "unknown check id '{}' in analysis",
                    reported.id
                )));
            }
            // Only failures attributable to the user count.
            if reported.offender == user.name {
                failures.push(CheckFailure {
                    id: reported.id,
                    reason: reported.reason,
                });
            }
        }
        Ok(failures)
    }
}

/// [`CheckEvaluator`] that passes everything; used for keyless development.
pub struct MockCheckEvaluator;

#[async_trait]
impl CheckEvaluator for MockCheckEvaluator {
    async fn check(
        &self,
        _user: &Persona,
        _agent: &Persona,
        _window: &[Message],
        _checks: &[CheckSpec],
    ) -> Result<Vec<CheckFailure>, CheckError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_evaluator_passes_everything() {
        let user = Persona::new("Sam", "You are Sam.");
        let agent = Persona::new("Riley", "You are Riley.");
        let checks = vec![CheckSpec {
            id: "figurative".into(),
            criterion: "The reply avoids figurative language.".into(),
        }];
        let failures = MockCheckEvaluator
            .check(&user, &agent, &[], &checks)
            .await
            .unwrap();
        assert!(failures.is_empty());
    }
}
