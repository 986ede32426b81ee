//! Narration track assembly: one speech clip per segment, joined in order.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::fs;
use tracing::{debug, info, warn};

use crate::{
    capabilities::SpeechSynthesizer,
    errors::{AppError, Result},
    pipeline::{media::MediaTool, parser::NarrationPlan},
};

const SILENCE_FILE: &str = "silence.mp3";
const MANIFEST_FILE: &str = "input_list.txt";

pub struct NarrationSynthesizer {
    speech: Arc<dyn SpeechSynthesizer>,
    media: Arc<dyn MediaTool>,
    temp_dir: PathBuf,
    audio_dir: PathBuf,
    silence_seconds: f64,
    pad_segment_gaps: bool,
}

impl NarrationSynthesizer {
    pub fn new(
        speech: Arc<dyn SpeechSynthesizer>,
        media: Arc<dyn MediaTool>,
        temp_dir: PathBuf,
        audio_dir: PathBuf,
        silence_seconds: f64,
        pad_segment_gaps: bool,
    ) -> Self {
        Self {
            speech,
            media,
            temp_dir,
            audio_dir,
            silence_seconds,
            pad_segment_gaps,
        }
    }

    /// Build `audio/<id>.mp3` from the plan.
    ///
    /// Segments are synthesized one after another. Any failure aborts the
    /// whole track; the per-request scratch directory is removed either way.
    pub async fn synthesize(&self, plan: &NarrationPlan, id: &str) -> Result<PathBuf> {
        if plan.segments.is_empty() {
            return Err(AppError::narration("narration plan has no segments"));
        }

        let scratch = self.temp_dir.join(id);
        let result = self.build_track(plan, id, &scratch).await;

        if let Err(err) = fs::remove_dir_all(&scratch).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(target: "narration", %id, error = %err, "failed to remove scratch directory");
            }
        }

        result
    }

    async fn build_track(&self, plan: &NarrationPlan, id: &str, scratch: &Path) -> Result<PathBuf> {
        fs::create_dir_all(scratch).await?;
        fs::create_dir_all(&self.audio_dir).await?;

        let mut segment_files = Vec::with_capacity(plan.segments.len());
        for (index, segment) in plan.segments.iter().enumerate() {
            let clip = self
                .speech
                .synthesize(&segment.text)
                .await
                .map_err(|err| AppError::narration(format!("segment {index}: {err}")))?;

            let file_name = format!("segment_{index}.{}", clip.file_extension);
            fs::write(scratch.join(&file_name), &clip.data).await?;
            debug!(
                target: "narration",
                %id,
                index,
                bytes = clip.data.len(),
                media_type = %clip.media_type,
                "segment synthesized"
            );
            segment_files.push(file_name);
        }

        self.media
            .silence(&scratch.join(SILENCE_FILE), self.silence_seconds)
            .await
            .map_err(|err| AppError::narration(format!("silence clip: {}", err.summary())))?;

        let padding = self.pad_segment_gaps.then_some(SILENCE_FILE);
        let manifest_path = scratch.join(MANIFEST_FILE);
        fs::write(&manifest_path, concat_manifest(&segment_files, padding)).await?;

        let track = self.audio_dir.join(format!("{id}.mp3"));
        if let Err(err) = self.media.concat(&manifest_path, &track).await {
            let _ = fs::remove_file(&track).await;
            return Err(AppError::narration(format!("concat: {}", err.summary())));
        }

        info!(
            target: "narration",
            %id,
            segments = segment_files.len(),
            padded = self.pad_segment_gaps,
            "narration track created"
        );
        Ok(track)
    }
}

/// ffmpeg concat-demuxer list, paths relative to the manifest.
fn concat_manifest(segment_files: &[String], padding: Option<&str>) -> String {
    let mut manifest = String::new();
    for (index, file) in segment_files.iter().enumerate() {
        if index > 0 {
            if let Some(silence) = padding {
                manifest.push_str(&format!("file '{silence}'\n"));
            }
        }
        manifest.push_str(&format!("file '{file}'\n"));
    }
    manifest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::parser::NarrationSegment,
        testing::{StubMedia, StubSpeech},
    };

    fn plan(texts: &[&str]) -> NarrationPlan {
        let mut start = 0.0;
        let segments = texts
            .iter()
            .map(|text| {
                let segment = NarrationSegment {
                    start_time: start,
                    duration: 2.0,
                    text: text.to_string(),
                    word_count: text.split_whitespace().count() as u32,
                };
                start += 2.0;
                segment
            })
            .collect();
        NarrationPlan {
            total_duration: start,
            segments,
        }
    }

    fn synthesizer(
        root: &Path,
        speech: Arc<StubSpeech>,
        media: Arc<StubMedia>,
        pad: bool,
    ) -> NarrationSynthesizer {
        NarrationSynthesizer::new(
            speech,
            media,
            root.join("temp"),
            root.join("audio"),
            1.0,
            pad,
        )
    }

    #[tokio::test]
    async fn segments_are_joined_in_order_without_padding() {
        let dir = tempfile::tempdir().unwrap();
        let speech = Arc::new(StubSpeech::new());
        let media = Arc::new(StubMedia::new());
        let narrator = synthesizer(dir.path(), speech.clone(), media.clone(), false);

        let track = narrator
            .synthesize(&plan(&["first part", "second part", "third part"]), "vid-1")
            .await
            .unwrap();

        assert_eq!(track, dir.path().join("audio/vid-1.mp3"));
        assert_eq!(
            fs::read_to_string(&track).await.unwrap(),
            "[first part][second part][third part]"
        );
        assert_eq!(speech.calls(), 3);
        assert!(!dir.path().join("temp/vid-1").exists());
    }

    #[tokio::test]
    async fn padding_inserts_silence_between_segments() {
        let dir = tempfile::tempdir().unwrap();
        let narrator = synthesizer(
            dir.path(),
            Arc::new(StubSpeech::new()),
            Arc::new(StubMedia::new()),
            true,
        );

        let track = narrator.synthesize(&plan(&["a", "b"]), "vid-2").await.unwrap();

        assert_eq!(fs::read_to_string(&track).await.unwrap(), "[a]<silence>[b]");
    }

    #[tokio::test]
    async fn one_failed_segment_aborts_the_track() {
        let dir = tempfile::tempdir().unwrap();
        let speech = Arc::new(StubSpeech::failing_at(1));
        let narrator = synthesizer(dir.path(), speech.clone(), Arc::new(StubMedia::new()), false);

        let err = narrator
            .synthesize(&plan(&["ok", "boom", "never"]), "vid-3")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Narration(_)));
        assert_eq!(speech.calls(), 2, "synthesis stops at the failing segment");
        assert!(!dir.path().join("audio/vid-3.mp3").exists());
        assert!(!dir.path().join("temp/vid-3").exists());
    }

    #[tokio::test]
    async fn failed_concat_leaves_no_track() {
        let dir = tempfile::tempdir().unwrap();
        let narrator = synthesizer(
            dir.path(),
            Arc::new(StubSpeech::new()),
            Arc::new(StubMedia::new().failing_concat()),
            false,
        );

        assert!(narrator.synthesize(&plan(&["a"]), "vid-4").await.is_err());
        assert!(!dir.path().join("audio/vid-4.mp3").exists());
        assert!(!dir.path().join("temp/vid-4").exists());
    }

    #[tokio::test]
    async fn empty_plan_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let narrator = synthesizer(
            dir.path(),
            Arc::new(StubSpeech::new()),
            Arc::new(StubMedia::new()),
            false,
        );

        let err = narrator.synthesize(&plan(&[]), "vid-5").await.unwrap_err();
        assert!(matches!(err, AppError::Narration(_)));
    }

    #[test]
    fn manifest_lists_files_relative_to_scratch() {
        let files = vec!["segment_0.mp3".to_string(), "segment_1.mp3".to_string()];
        assert_eq!(
            concat_manifest(&files, None),
            "file 'segment_0.mp3'\nfile 'segment_1.mp3'\n"
        );
        assert_eq!(
            concat_manifest(&files, Some("silence.mp3")),
            "file 'segment_0.mp3'\nfile 'silence.mp3'\nfile 'segment_1.mp3'\n"
        );
    }
}
