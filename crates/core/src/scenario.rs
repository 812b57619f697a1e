//! Conversation setup collaborator: turns a level's scenario seed (or a
//! playground topic) into the concrete perspectives and personas one
//! conversation runs under.

use crate::generate::{GenerationError, Persona, parse_json_payload};
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

/// The two perspectives a conversation is generated under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub user_perspective: String,
    pub agent_perspective: String,
    pub user_goal: Option<String>,
    pub is_user_initiated: bool,
}

/// Hand-authored template a level ships with; `{agent}` placeholders are
/// filled with the chosen agent name when the conversation is created.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioSeed {
    pub user_perspective: &'static str,
    pub agent_perspective: &'static str,
    pub user_goal: &'static str,
    pub is_user_initiated: bool,
}

impl ScenarioSeed {
    fn fill(&self, agent_name: &str) -> Scenario {
        Scenario {
            user_perspective: self.user_perspective.replace("{agent}", agent_name),
            agent_perspective: self.agent_perspective.replace("{agent}", agent_name),
            user_goal: Some(self.user_goal.replace("{agent}", agent_name)),
            is_user_initiated: self.is_user_initiated,
        }
    }
}

#[async_trait]
pub trait ScenarioService: Send + Sync {
    /// Adapt a level's seed to this user and agent.
    async fn level_scenario(
        &self,
        seed: &ScenarioSeed,
        user: &Persona,
        agent_name: &str,
    ) -> Result<Scenario, GenerationError>;

    /// Invent a playground topic from the user's interests and build the
    /// free-conversation scenario around it.
    async fn playground_scenario(
        &self,
        user: &Persona,
        agent_name: &str,
        interests: &[String],
    ) -> Result<(String, Scenario), GenerationError>;

    /// Write the agent persona that speaks the agent perspective.
    async fn agent_persona(
        &self,
        agent_perspective: &str,
        agent_name: &str,
    ) -> Result<Persona, GenerationError>;
}

fn playground_scenario_for_topic(topic: &str, user_name: &str, agent_name: &str) -> Scenario {
    Scenario {
        user_perspective: format!(
            "You are interested in {topic} and want to learn more about the topic. You \
             engage in a conversation with {agent_name}, who is an expert in the field, \
             to further your understanding. Ask questions and engage in a conversation \
             to learn more."
        ),
        agent_perspective: format!(
            "You are an expert in {topic} and are highly knowledgeable about the \
             subject. Your goal is to help {user_name} understand the topic better by \
             engaging in a conversation with them, detailing the key points and \
             answering any questions they may have."
        ),
        user_goal: None,
        is_user_initiated: true,
    }
}

#[derive(Deserialize)]
struct ScenarioPayload {
    user_perspective: String,
    agent_perspective: String,
    user_goal: String,
}

#[derive(Deserialize)]
struct TopicPayload {
    topic: String,
}

#[derive(Deserialize)]
struct PersonaPayload {
    persona: String,
}

/// [`ScenarioService`] backed by an OpenAI-compatible chat-completions API.
pub struct OpenAiScenarioService {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiScenarioService {
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
impl ScenarioService for OpenAiScenarioService {
    async fn level_scenario(
        &self,
        seed: &ScenarioSeed,
        user: &Persona,
        agent_name: &str,
    ) -> Result<Scenario, GenerationError> {
        let template = seed.fill(agent_name);
        let system = format!(
            "As a scenario writer, your task is to adapt a conversation scenario to a \
             specific user. Rewrite the perspectives so they fit the user's background \
             while keeping the same situation and roles. Keep '{agent_name}' as the \
             other person's name. Respond with a JSON object with the keys \
             'user_perspective', 'agent_perspective' and 'user_goal'.",
        );
        let prompt = format!(
            "User: {}\nScenario to adapt:\nuser_perspective: {}\nagent_perspective: \
             {}\nuser_goal: {}",
            user.description,
            template.user_perspective,
            template.agent_perspective,
            template.user_goal.as_deref().unwrap_or(""),
        );
        let raw = self.complete(system, prompt).await?;
        let payload: ScenarioPayload = parse_json_payload(&raw)?;
        Ok(Scenario {
            user_perspective: payload.user_perspective,
            agent_perspective: payload.agent_perspective,
            user_goal: Some(payload.user_goal),
            is_user_initiated: seed.is_user_initiated,
        })
    }

    async fn playground_scenario(
        &self,
        user: &Persona,
        agent_name: &str,
        interests: &[String],
    ) -> Result<(String, Scenario), GenerationError> {
        let system = "Your task is to pick a conversation topic based on a list of the \
                      user's interests. Identify the topic as a single noun phrase. \
                      Return a JSON object with the key 'topic' and the topic as the \
                      value."
            .to_string();
        let prompt = if interests.is_empty() {
            "No interests known; pick an everyday topic.".to_string()
        } else {
            interests.join("\n")
        };
        let raw = self.complete(system, prompt).await?;
        let payload: TopicPayload = parse_json_payload(&raw)?;
        let scenario = playground_scenario_for_topic(&payload.topic, &user.name, agent_name);
        Ok((payload.topic, scenario))
    }

    async fn agent_persona(
        &self,
        agent_perspective: &str,
        agent_name: &str,
    ) -> Result<Persona, GenerationError> {
        let system = format!(
            "As a persona generator, your task is to generate a system prompt that \
             will be used to embody a persona named {agent_name} for the situation \
             described by the user. Fill in gaps with logical assumptions. Respond \
             with a JSON object containing the key 'persona' and the system prompt as \
             the value. Start with 'You are {agent_name}...'",
        );
        let raw = self.complete(system, agent_perspective.to_string()).await?;
        let payload: PersonaPayload = parse_json_payload(&raw)?;
        Ok(Persona::new(agent_name, payload.persona))
    }
}

/// Deterministic [`ScenarioService`] for development and tests: fills seeds
/// verbatim and derives personas mechanically.
pub struct MockScenarioService;

#[async_trait]
impl ScenarioService for MockScenarioService {
    async fn level_scenario(
        &self,
        seed: &ScenarioSeed,
        _user: &Persona,
        agent_name: &str,
    ) -> Result<Scenario, GenerationError> {
        Ok(seed.fill(agent_name))
    }

    async fn playground_scenario(
        &self,
        user: &Persona,
        agent_name: &str,
        interests: &[String],
    ) -> Result<(String, Scenario), GenerationError> {
        let topic = interests
            .first()
            .cloned()
            .unwrap_or_else(|| "technology".to_string());
        let scenario = playground_scenario_for_topic(&topic, &user.name, agent_name);
        Ok((topic, scenario))
    }

    async fn agent_persona(
        &self,
        agent_perspective: &str,
        agent_name: &str,
    ) -> Result<Persona, GenerationError> {
        Ok(Persona::new(
            agent_name,
            format!("You are {agent_name}. {agent_perspective}"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_service_fills_seed_placeholders() {
        let seed = ScenarioSeed {
            user_perspective: "A colleague named {agent} asks you about a client.",
            agent_perspective: "You reach out to a colleague about a client.",
            user_goal: "Give {agent} helpful advice.",
            is_user_initiated: false,
        };
        let user = Persona::new("Sam", "You are Sam.");
        let scenario = MockScenarioService
            .level_scenario(&seed, &user, "Riley")
            .await
            .unwrap();
        assert_eq!(
            scenario.user_perspective,
            "A colleague named Riley asks you about a client."
        );
        assert_eq!(scenario.user_goal.as_deref(), Some("Give Riley helpful advice."));
        assert!(!scenario.is_user_initiated);
    }

    #[tokio::test]
    async fn mock_playground_topic_comes_from_interests() {
        let user = Persona::new("Sam", "You are Sam.");
        let (topic, scenario) = MockScenarioService
            .playground_scenario(&user, "Riley", &["astronomy".into()])
            .await
            .unwrap();
        assert_eq!(topic, "astronomy");
        assert!(scenario.user_perspective.contains("astronomy"));
        assert!(scenario.agent_perspective.contains("Sam"));
        assert!(scenario.is_user_initiated);
    }
}
