use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    capabilities::{
        DeepgramSpeech, OcrEngine, ScriptAuthor, ScriptModel, SpeechSynthesizer, TesseractOcr,
    },
    config::AppConfig,
    errors::{AppError, Result},
    pipeline::{
        media::{FfmpegTool, MediaTool},
        mux::Muxer,
        narration::NarrationSynthesizer,
        parser::{NarrationPlan, ParsedResponse, parse_completion},
        render::{ManimCli, RenderArtifact, RenderInvoker, SceneRenderer},
    },
    shortcuts::ShortcutTable,
    util::{ArtifactStore, ImageUpload},
};

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub prompt: String,
    pub include_narration: bool,
    pub additional_context: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            include_narration: true,
            additional_context: None,
        }
    }

    pub fn with_narration(mut self, include: bool) -> Self {
        self.include_narration = include;
        self
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.additional_context = context.filter(|extra| !extra.trim().is_empty());
        self
    }

    /// Prompt text sent to the model and matched against shortcuts.
    pub fn effective_prompt(&self) -> String {
        match &self.additional_context {
            Some(extra) => format!("{}\n\nAdditional instructions: {}", self.prompt, extra),
            None => self.prompt.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
    pub video_path: String,
    pub audio_path: Option<String>,
    pub has_narration: bool,
    pub narration_data: Option<NarrationPlan>,
    pub message: String,
    pub is_hardcoded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextExtraction {
    pub text: String,
    pub word_count: usize,
}

#[derive(Clone, Copy)]
enum Origin {
    Prompt,
    Image,
}

impl Origin {
    fn shortcut_message(self, prompt: &str) -> String {
        match self {
            Origin::Prompt => format!("Video generated successfully for: {prompt}"),
            Origin::Image => format!("Video generated successfully from image for: {prompt}"),
        }
    }

    fn message(self, narrated: bool) -> &'static str {
        match (self, narrated) {
            (Origin::Prompt, true) => "Video with narration generated successfully",
            (Origin::Prompt, false) => "Video generated successfully (no narration)",
            (Origin::Image, true) => "Video with narration generated successfully from image",
            (Origin::Image, false) => "Video generated successfully from image (no narration)",
        }
    }
}

/// External tools the orchestrator drives.
pub struct Collaborators {
    pub model: Option<Arc<dyn ScriptModel>>,
    pub renderer: Arc<dyn SceneRenderer>,
    pub speech: Option<Arc<dyn SpeechSynthesizer>>,
    pub media: Arc<dyn MediaTool>,
    pub ocr: Arc<dyn OcrEngine>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub format: String,
    pub quality: String,
    pub silence_seconds: f64,
    pub pad_segment_gaps: bool,
    pub prune_superseded: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            format: "mp4".to_string(),
            quality: "m".to_string(),
            silence_seconds: 1.0,
            pad_segment_gaps: false,
            prune_superseded: true,
        }
    }
}

pub struct VideoOrchestrator {
    model: Option<Arc<dyn ScriptModel>>,
    ocr: Arc<dyn OcrEngine>,
    render: RenderInvoker,
    narration: Option<NarrationSynthesizer>,
    muxer: Muxer,
    shortcuts: ShortcutTable,
    store: Arc<ArtifactStore>,
    prune_superseded: bool,
}

impl VideoOrchestrator {
    pub fn from_config(config: &AppConfig, store: Arc<ArtifactStore>) -> Result<Self> {
        let model: Option<Arc<dyn ScriptModel>> = match config.model.as_ref() {
            Some(cfg) => {
                info!(target: "orchestrator", provider = %cfg.provider, model = %cfg.model, "script model configured");
                Some(Arc::new(ScriptAuthor::from_config(cfg)?))
            }
            None => {
                warn!(target: "orchestrator", "no model API key configured, only shortcuts can be served");
                None
            }
        };

        let speech: Option<Arc<dyn SpeechSynthesizer>> = match config.speech.as_ref() {
            Some(cfg) => Some(Arc::new(DeepgramSpeech::new(cfg)?)),
            None => {
                warn!(target: "orchestrator", "no speech API key configured, videos will have no narration");
                None
            }
        };

        let collaborators = Collaborators {
            model,
            renderer: Arc::new(ManimCli::new(&config.renderer)),
            speech,
            media: Arc::new(FfmpegTool::new(&config.media)),
            ocr: Arc::new(TesseractOcr::new(&config.ocr)),
        };

        let settings = PipelineSettings {
            format: config.renderer.format.clone(),
            quality: config.renderer.quality.clone(),
            silence_seconds: config.media.silence_seconds,
            pad_segment_gaps: config.media.pad_segment_gaps,
            prune_superseded: config.retention.prune_superseded,
        };

        Ok(Self::from_parts(
            settings,
            collaborators,
            config.shortcuts.clone(),
            store,
        ))
    }

    pub fn from_parts(
        settings: PipelineSettings,
        collaborators: Collaborators,
        shortcuts: ShortcutTable,
        store: Arc<ArtifactStore>,
    ) -> Self {
        let Collaborators {
            model,
            renderer,
            speech,
            media,
            ocr,
        } = collaborators;

        let render = RenderInvoker::new(
            renderer,
            store.temp_dir().to_path_buf(),
            store.videos_dir().to_path_buf(),
            settings.format,
            settings.quality,
            settings.prune_superseded,
        );

        let narration = speech.map(|speech| {
            NarrationSynthesizer::new(
                speech,
                media.clone(),
                store.temp_dir().to_path_buf(),
                store.audio_dir().to_path_buf(),
                settings.silence_seconds,
                settings.pad_segment_gaps,
            )
        });

        Self {
            model,
            ocr,
            render,
            narration,
            muxer: Muxer::new(media),
            shortcuts,
            store,
            prune_superseded: settings.prune_superseded,
        }
    }

    pub fn shortcuts(&self) -> &ShortcutTable {
        &self.shortcuts
    }

    pub async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutcome> {
        self.run(&request, Origin::Prompt).await
    }

    /// OCR the upload and continue as [`generate`](Self::generate) with the
    /// extracted text. The stored upload is removed whatever the outcome.
    pub async fn generate_from_image(
        &self,
        upload: ImageUpload,
        include_narration: bool,
        additional_prompt: Option<String>,
    ) -> Result<GenerationOutcome> {
        let image = self.store.persist_upload(&upload).await?;
        let result = async {
            let text = self.ocr.extract(&image).await?;
            if text.trim().is_empty() {
                return Err(AppError::EmptyExtraction);
            }

            let request = GenerationRequest::new(text.clone())
                .with_narration(include_narration)
                .with_context(additional_prompt);
            let mut outcome = self.run(&request, Origin::Image).await?;
            outcome.extracted_text = Some(text);
            Ok(outcome)
        }
        .await;

        self.store.discard_upload(&image).await;
        result
    }

    pub async fn extract_text(&self, upload: ImageUpload) -> Result<TextExtraction> {
        let image = self.store.persist_upload(&upload).await?;
        let result = self.ocr.extract(&image).await;
        self.store.discard_upload(&image).await;

        let text = result?;
        let word_count = text.split_whitespace().count();
        Ok(TextExtraction { text, word_count })
    }

    /// Model call and parsing only; nothing is rendered.
    pub async fn generate_code(&self, prompt: &str) -> Result<ParsedResponse> {
        let completion = self.model()?.complete(prompt).await?;
        let parsed = parse_completion(&completion);
        self.report_parse(&parsed);
        Ok(parsed)
    }

    fn model(&self) -> Result<&Arc<dyn ScriptModel>> {
        self.model
            .as_ref()
            .ok_or(AppError::MissingConfig("model.api_key"))
    }

    async fn run(&self, request: &GenerationRequest, origin: Origin) -> Result<GenerationOutcome> {
        let prompt = request.effective_prompt();
        let preview: String = prompt.chars().take(200).collect();
        info!(target: "orchestrator", prompt = %preview, narration = request.include_narration, "generation requested");

        if let Some(outcome) = self.try_shortcut(&prompt, origin).await {
            return Ok(outcome);
        }

        let completion = self.model()?.complete(&prompt).await?;
        let parsed = parse_completion(&completion);
        self.report_parse(&parsed);

        let ParsedResponse {
            script, narration, ..
        } = parsed;
        let video = self.render.render(&script).await?;

        let mut final_video = video.path.clone();
        let mut audio_path = None;

        match (&narration, &self.narration) {
            (Some(plan), Some(narrator)) if request.include_narration && !plan.segments.is_empty() => {
                match narrator.synthesize(plan, &video.id).await {
                    Ok(track) => {
                        audio_path = Some(self.store.audio_url(&track));
                        match self.muxer.combine(&video.path, &track).await {
                            Ok(combined) => {
                                final_video = combined;
                                self.prune_silent_video(&video).await;
                            }
                            Err(err) => {
                                warn!(target: "orchestrator", id = %video.id, error = %err, "mux failed, returning video without narration");
                            }
                        }
                    }
                    Err(err) => {
                        warn!(target: "orchestrator", id = %video.id, error = %err, "narration failed, returning video without narration");
                    }
                }
            }
            (Some(plan), None) if request.include_narration && !plan.segments.is_empty() => {
                warn!(target: "orchestrator", id = %video.id, "narration requested but speech synthesis is not configured");
            }
            _ => {}
        }

        let narrated = final_video != video.path;
        info!(target: "orchestrator", id = %video.id, narrated, "generation finished");

        Ok(GenerationOutcome {
            success: true,
            extracted_text: None,
            video_path: self.store.video_url(&final_video),
            audio_path,
            has_narration: narrated,
            narration_data: narration,
            message: origin.message(narrated).to_string(),
            is_hardcoded: false,
        })
    }

    async fn try_shortcut(&self, prompt: &str, origin: Origin) -> Option<GenerationOutcome> {
        let shortcut = self.shortcuts.lookup(prompt)?;
        info!(target: "orchestrator", matched = %shortcut.prompt, video = %shortcut.video_file, delay_ms = shortcut.delay.as_millis() as u64, "prompt matches a shortcut");

        tokio::time::sleep(shortcut.delay).await;

        let path = match self.store.video_path(&shortcut.video_file) {
            Ok(path) => path,
            Err(err) => {
                warn!(target: "orchestrator", video = %shortcut.video_file, error = %err, "shortcut file name rejected");
                return None;
            }
        };
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!(target: "orchestrator", video = %shortcut.video_file, "shortcut video missing, falling back to generation");
            return None;
        }

        Some(GenerationOutcome {
            success: true,
            extracted_text: None,
            video_path: self.store.video_url(&path),
            audio_path: None,
            has_narration: true,
            narration_data: None,
            message: origin.shortcut_message(prompt),
            is_hardcoded: true,
        })
    }

    fn report_parse(&self, parsed: &ParsedResponse) {
        let code_preview: String = parsed.script.code.chars().take(200).collect();
        debug!(target: "orchestrator", code = %code_preview, "scene script extracted");

        if parsed.is_degraded() {
            warn!(
                target: "orchestrator",
                source = ?parsed.code_source,
                dropped_segments = parsed.dropped_segments,
                "completion did not follow the output contract"
            );
        }

        match &parsed.narration {
            Some(plan) => {
                info!(
                    target: "orchestrator",
                    scene = %parsed.script.scene_name,
                    segments = plan.segments.len(),
                    total_duration = plan.total_duration,
                    "narration plan parsed"
                );
                for issue in plan.timing_issues() {
                    warn!(target: "orchestrator", %issue, "narration timing");
                }
            }
            None => {
                info!(target: "orchestrator", scene = %parsed.script.scene_name, "completion has no narration");
            }
        }
    }

    async fn prune_silent_video(&self, video: &RenderArtifact) {
        if !self.prune_superseded {
            return;
        }
        let protected = self.shortcuts.video_files().any(|file| {
            video
                .path
                .file_name()
                .is_some_and(|name| name.to_string_lossy() == file)
        });
        if protected {
            return;
        }
        if let Err(err) = tokio::fs::remove_file(&video.path).await {
            warn!(target: "orchestrator", id = %video.id, error = %err, "failed to remove silent video");
        }
    }

    #[cfg(test)]
    fn video_file(&self, url: &str) -> std::path::PathBuf {
        self.store
            .videos_dir()
            .join(url.trim_start_matches("/videos/"))
    }
}
