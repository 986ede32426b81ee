use async_trait::async_trait;
use rig::{
    agent::Agent,
    client::CompletionClient,
    completion::Prompt,
    providers::{gemini, openai},
};
use tracing::debug;

use crate::{
    config::ModelConfig,
    errors::{AppError, Result},
};

type OpenAiCompletionModel = <openai::Client as CompletionClient>::CompletionModel;
type GeminiCompletionModel = <gemini::Client as CompletionClient>::CompletionModel;

/// Text completion used to author scene scripts.
#[async_trait]
pub trait ScriptModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

pub struct ScriptAuthor {
    backend: ScriptBackend,
    model_name: String,
}

enum ScriptBackend {
    OpenAi(Agent<OpenAiCompletionModel>),
    Gemini(Agent<GeminiCompletionModel>),
}

impl ScriptAuthor {
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let backend = match config.provider.as_str() {
            "openai" => {
                let client = openai::Client::new(&config.api_key);
                let agent = client
                    .agent(&config.model)
                    .name("manim-author")
                    .preamble(&config.instructions)
                    .temperature(config.temperature)
                    .build();
                ScriptBackend::OpenAi(agent)
            }
            "gemini" => {
                let client = gemini::Client::new(&config.api_key);
                let agent = client
                    .agent(&config.model)
                    .name("manim-author")
                    .preamble(&config.instructions)
                    .temperature(config.temperature)
                    .build();
                ScriptBackend::Gemini(agent)
            }
            other => {
                return Err(AppError::other(format!(
                    "unsupported model provider: {other}"
                )));
            }
        };

        Ok(Self {
            backend,
            model_name: config.model.clone(),
        })
    }
}

#[async_trait]
impl ScriptModel for ScriptAuthor {
    async fn complete(&self, prompt: &str) -> Result<String> {
        debug!(target: "script_author", model = %self.model_name, "requesting scene script");

        let response = match &self.backend {
            ScriptBackend::OpenAi(agent) => agent.prompt(prompt).await,
            ScriptBackend::Gemini(agent) => agent.prompt(prompt).await,
        }
        .map_err(|err| AppError::Model(err.to_string()))?;

        if response.trim().is_empty() {
            return Err(AppError::Model(format!(
                "{} returned an empty completion",
                self.model_name
            )));
        }

        Ok(response)
    }
}
