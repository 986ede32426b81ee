use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use tracing::debug;

use crate::{
    capabilities::BinaryArtifact,
    config::SpeechConfig,
    errors::{AppError, Result},
};

/// Turns one narration segment into encoded audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<BinaryArtifact>;
}

pub struct DeepgramSpeech {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    voice: String,
    encoding: String,
}

impl DeepgramSpeech {
    pub fn new(config: &SpeechConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent("ManimNarrator/0.1");
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            voice: config.voice.clone(),
            encoding: config.encoding.clone(),
        })
    }
}

#[derive(Serialize)]
struct SpeakRequest<'a> {
    text: &'a str,
}

#[async_trait]
impl SpeechSynthesizer for DeepgramSpeech {
    async fn synthesize(&self, text: &str) -> Result<BinaryArtifact> {
        let preview: String = text.chars().take(50).collect();
        debug!(target: "speech", voice = %self.voice, %preview, "synthesizing segment");

        let response = self
            .client
            .post(&self.endpoint)
            .query(&[("model", self.voice.as_str()), ("encoding", self.encoding.as_str())])
            .header(AUTHORIZATION, format!("Token {}", self.api_key))
            .json(&SpeakRequest { text })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Speech(format!(
                "Deepgram returned {status}: {}",
                body.trim()
            )));
        }

        let media_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("audio/mpeg")
            .to_string();

        let data = response.bytes().await?.to_vec();
        if data.is_empty() {
            return Err(AppError::Speech("Deepgram returned no audio".to_string()));
        }

        Ok(BinaryArtifact::new(data, media_type, self.encoding.clone()))
    }
}
