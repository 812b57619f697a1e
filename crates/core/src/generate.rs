//! Message-generation collaborator: the external service that turns an
//! instruction plus conversation history into one in-character message.
//!
//! The engine only depends on the [`MessageGenerator`] trait. An
//! OpenAI-compatible implementation and a deterministic mock (for development
//! and tests without an API key) are provided here.

use crate::flow::Instruction;
use crate::transcript::{Feedback, Message};
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
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Failure of the generation collaborator. Propagated unmodified to the
/// caller; nothing is persisted for the failed turn, so the call is safe to
/// retry.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("message provider call failed: {0}")]
    Provider(String),
    #[error("message provider returned an unusable payload: {0}")]
    InvalidResponse(String),
}

/// One side of the conversation: a display name plus the persona description
/// the generator speaks from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub description: String,
}

impl Persona {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

#[async_trait]
pub trait MessageGenerator: Send + Sync {
    /// Produce the next in-character message for `persona` under the given
    /// scenario, history and instruction.
    async fn generate(
        &self,
        persona: &Persona,
        scenario: &str,
        history: &[Message],
        instruction: &Instruction,
    ) -> Result<String, GenerationError>;

    /// Compose coaching feedback about the tail of the conversation,
    /// addressing the given prompt points.
    async fn feedback(
        &self,
        user: &Persona,
        agent: &Persona,
        window: &[Message],
        prompts: &[String],
    ) -> Result<Feedback, GenerationError>;
}

/// Wire shape messages are serialized to for the provider.
#[derive(Serialize)]
struct WireMessage<'a> {
    sender: &'a str,
    message: &'a str,
}

fn wire_history(history: &[Message]) -> Result<String, GenerationError> {
    if history.is_empty() {
        return Ok("[CONVERSATION START]".to_string());
    }
    let wire: Vec<WireMessage<'_>> = history
        .iter()
        .map(|m| WireMessage {
            sender: &m.sender,
            message: &m.text,
        })
        .collect();
    serde_json::to_string(&wire).map_err(|e| GenerationError::InvalidResponse(e.to_string()))
}

/// Providers occasionally wrap JSON replies in markdown fences; strip them
/// before parsing.
pub(crate) fn parse_json_payload<T: DeserializeOwned>(raw: &str) -> Result<T, GenerationError> {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed).trim();
    serde_json::from_str(trimmed).map_err(|e| GenerationError::InvalidResponse(e.to_string()))
}

fn render_examples(instruction: &Instruction) -> String {
    if instruction.examples.is_empty() {
        return String::new();
    }
    let mut out = String::from("Examples:\n");
    for example in &instruction.examples {
        for prior in &example.prior {
            out.push_str(prior);
            out.push('\n');
        }
        out.push_str("-> ");
        out.push_str(&example.reply);
        out.push('\n');
    }
    out
}

fn message_system_prompt(persona: &Persona, scenario: &str, instruction: &Instruction) -> String {
    let instructions = if instruction.description.is_empty() {
        String::new()
    } else {
        format!("Instructions: {}\n", instruction.description)
    };
    format!(
        "{}\nScenario: {}\n{}{}You are chatting over text. Keep your messages under 50 \
         words and appropriate for a text conversation. Keep the conversation going. \
         Return a JSON object with the key 'message' and your message as the value and \
         the key 'sender' with '{}' as the value. Respond ONLY with your next message. \
         Do not include the previous messages in your response.",
        persona.description,
        scenario,
        instructions,
        render_examples(instruction),
        persona.name,
    )
}

#[derive(Deserialize)]
struct MessagePayload {
    message: String,
    sender: String,
}

#[derive(Deserialize)]
struct FeedbackPayload {
    title: String,
    body: String,
}

/// [`MessageGenerator`] backed by any OpenAI-compatible chat-completions API.
pub struct OpenAiMessageGenerator {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiMessageGenerator {
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }

    async fn complete(&self, system: String, prompt: String) -> Result<String, GenerationError> {
        let provider = |e: async_openai::error::OpenAIError| GenerationError::Provider(e.to_string());
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
        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| GenerationError::InvalidResponse("no content in completion".into()))
    }
}

#[async_trait]
impl MessageGenerator for OpenAiMessageGenerator {
    async fn generate(
        &self,
        persona: &Persona,
        scenario: &str,
        history: &[Message],
        instruction: &Instruction,
    ) -> Result<String, GenerationError> {
        let system = message_system_prompt(persona, scenario, instruction);
        let prompt = wire_history(history)?;
        let raw = self.complete(system, prompt).await?;
        let payload: MessagePayload = parse_json_payload(&raw)?;
        if payload.sender != persona.name {
            return Err(GenerationError::InvalidResponse(format!(
                "sender must be {}, got {}",
                persona.name, payload.sender
            )));
        }
        Ok(payload.message)
    }

    async fn feedback(
        &self,
        user: &Persona,
        agent: &Persona,
        window: &[Message],
        prompts: &[String],
    ) -> Result<Feedback, GenerationError> {
        let system = format!(
            "You are a social skills coach. Your task is to provide feedback on the \
             ongoing conversation between {} (the user) and {}. The conversation is \
             happening over text. Address the following points in your feedback:\n{}\n\
             Use second person pronouns to address the user directly. Respond with a \
             JSON object with the key 'title' containing the title (less than 50 \
             characters) of your feedback and the key 'body' containing the feedback \
             (less than 100 words).",
            user.name,
            agent.name,
            prompts.join("\n"),
        );
        let prompt = wire_history(window)?;
        let raw = self.complete(system, prompt).await?;
        let payload: FeedbackPayload = parse_json_payload(&raw)?;
        Ok(Feedback {
            title: payload.title,
            body: payload.body,
            follow_up: None,
        })
    }
}

/// Deterministic generator for development and tests: replies with the
/// instruction's first example, or with the instruction text itself.
pub struct MockMessageGenerator;

#[async_trait]
impl MessageGenerator for MockMessageGenerator {
    async fn generate(
        &self,
        _persona: &Persona,
        _scenario: &str,
        _history: &[Message],
        instruction: &Instruction,
    ) -> Result<String, GenerationError> {
        Ok(instruction
            .examples
            .first()
            .map(|example| example.reply.clone())
            .unwrap_or_else(|| instruction.description.clone()))
    }

    async fn feedback(
        &self,
        _user: &Persona,
        _agent: &Persona,
        _window: &[Message],
        prompts: &[String],
    ) -> Result<Feedback, GenerationError> {
        Ok(Feedback {
            title: "Something to work on".into(),
            body: prompts.join(" "),
            follow_up: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_payload_strips_markdown_fences() {
        let raw = "```json\n{\"message\": \"Hi!\", \"sender\": \"Riley\"}\n```";
        let payload: MessagePayload = parse_json_payload(raw).unwrap();
        assert_eq!(payload.message, "Hi!");
        assert_eq!(payload.sender, "Riley");
    }

    #[test]
    fn parse_json_payload_rejects_garbage() {
        let result: Result<MessagePayload, _> = parse_json_payload("not json at all");
        assert!(matches!(result, Err(GenerationError::InvalidResponse(_))));
    }

    #[test]
    fn system_prompt_carries_persona_scenario_and_instruction() {
        let persona = Persona::new("Riley", "You are Riley, a marketing consultant.");
        let instruction =
            Instruction::new("I will ask about the client.").example(&["Hello!"], "Hi, got a minute?");
        let prompt = message_system_prompt(&persona, "You reach out to a colleague.", &instruction);
        assert!(prompt.contains("You are Riley, a marketing consultant."));
        assert!(prompt.contains("Scenario: You reach out to a colleague."));
        assert!(prompt.contains("Instructions: I will ask about the client."));
        assert!(prompt.contains("-> Hi, got a minute?"));
        assert!(prompt.contains("'Riley'"));
    }

    #[test]
    fn empty_history_uses_the_start_marker() {
        assert_eq!(wire_history(&[]).unwrap(), "[CONVERSATION START]");
        let history = vec![Message {
            sender: "Riley".into(),
            text: "Hello!".into(),
            user_sent: false,
        }];
        let wire = wire_history(&history).unwrap();
        assert_eq!(wire, r#"[{"sender":"Riley","message":"Hello!"}]"#);
    }

    #[tokio::test]
    async fn mock_generator_prefers_example_replies() {
        let persona = Persona::new("Sam", "You are Sam.");
        let with_example = Instruction::new("I will answer.").example(&["Q?"], "A clear answer.");
        let text = MockMessageGenerator
            .generate(&persona, "scenario", &[], &with_example)
            .await
            .unwrap();
        assert_eq!(text, "A clear answer.");

        let bare = Instruction::new("I will say goodbye.");
        let text = MockMessageGenerator
            .generate(&persona, "scenario", &[], &bare)
            .await
            .unwrap();
        assert_eq!(text, "I will say goodbye.");
    }
}
