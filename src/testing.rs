//! Collaborator stubs shared by the unit tests.

use std::{
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;

use crate::{
    capabilities::{BinaryArtifact, OcrEngine, ScriptModel, SpeechSynthesizer},
    errors::{AppError, Result},
    pipeline::{
        media::MediaTool,
        process::{ToolError, ToolOutput},
        render::{RenderJob, SceneRenderer},
    },
};

const VIDEO_PAYLOAD: &[u8] = b"rendered-video";

fn tool_failure(program: &str) -> ToolError {
    ToolError::Failed {
        program: program.to_string(),
        exit_code: Some(1),
        stderr: "Traceback (most recent call last)".to_string(),
    }
}

pub struct StubModel {
    completion: String,
    calls: AtomicUsize,
}

impl StubModel {
    pub fn new(completion: impl Into<String>) -> Self {
        Self {
            completion: completion.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptModel for StubModel {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.completion.clone())
    }
}

/// Where [`StubRenderer`] leaves its output.
#[derive(Debug, Clone, Copy)]
pub enum Placement {
    Flat,
    LegacyNested,
    Elsewhere,
    Nowhere,
    Fail,
}

pub struct StubRenderer {
    placement: Placement,
    stderr: String,
    scenes: Mutex<Vec<String>>,
}

impl StubRenderer {
    pub fn new(placement: Placement) -> Self {
        Self {
            placement,
            stderr: String::new(),
            scenes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_stderr(mut self, stderr: &str) -> Self {
        self.stderr = stderr.to_string();
        self
    }

    pub fn payload(&self) -> Vec<u8> {
        VIDEO_PAYLOAD.to_vec()
    }

    pub fn scenes(&self) -> Vec<String> {
        self.scenes.lock().unwrap().clone()
    }
}

#[async_trait]
impl SceneRenderer for StubRenderer {
    async fn render(&self, job: &RenderJob<'_>) -> std::result::Result<ToolOutput, ToolError> {
        self.scenes.lock().unwrap().push(job.scene.to_string());
        assert!(job.script.exists(), "script must exist while rendering");

        let file_name = format!("{}.{}", job.output_id, job.format);
        let dir: Option<PathBuf> = match self.placement {
            Placement::Flat => Some(job.media_dir.to_path_buf()),
            Placement::LegacyNested => Some(job.media_dir.join("videos").join(job.scene).join("720p30")),
            Placement::Elsewhere => Some(job.media_dir.join("partial_movie_files").join("run")),
            Placement::Nowhere => None,
            Placement::Fail => return Err(tool_failure("manim")),
        };

        if let Some(dir) = dir {
            std::fs::create_dir_all(&dir).map_err(|source| ToolError::Spawn {
                program: "manim".to_string(),
                source,
            })?;
            std::fs::write(dir.join(file_name), VIDEO_PAYLOAD).map_err(|source| {
                ToolError::Spawn {
                    program: "manim".to_string(),
                    source,
                }
            })?;
        }

        Ok(ToolOutput {
            stdout: String::new(),
            stderr: self.stderr.clone(),
        })
    }
}

/// Returns `[<text>]` as the audio bytes of each segment.
pub struct StubSpeech {
    fail_on: Option<usize>,
    calls: AtomicUsize,
}

impl StubSpeech {
    pub fn new() -> Self {
        Self {
            fail_on: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing_at(index: usize) -> Self {
        Self {
            fail_on: Some(index),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for StubSpeech {
    async fn synthesize(&self, text: &str) -> Result<BinaryArtifact> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on == Some(index) {
            return Err(AppError::Speech("Deepgram returned 500".to_string()));
        }
        Ok(BinaryArtifact::new(
            format!("[{text}]").into_bytes(),
            "audio/mpeg",
            "mp3",
        ))
    }
}

/// File-level stand-in for ffmpeg: concat joins bytes, mux writes `V+A`.
/// A failing mux still leaves a partial output file.
pub struct StubMedia {
    fail_concat: bool,
    fail_mux: bool,
}

impl StubMedia {
    pub fn new() -> Self {
        Self {
            fail_concat: false,
            fail_mux: false,
        }
    }

    pub fn failing_concat(mut self) -> Self {
        self.fail_concat = true;
        self
    }

    pub fn failing_mux(mut self) -> Self {
        self.fail_mux = true;
        self
    }
}

fn io_failure(source: std::io::Error) -> ToolError {
    ToolError::Spawn {
        program: "ffmpeg".to_string(),
        source,
    }
}

#[async_trait]
impl MediaTool for StubMedia {
    async fn silence(&self, output: &Path, _seconds: f64) -> std::result::Result<(), ToolError> {
        std::fs::write(output, b"<silence>").map_err(io_failure)
    }

    async fn concat(&self, manifest: &Path, output: &Path) -> std::result::Result<(), ToolError> {
        if self.fail_concat {
            return Err(tool_failure("ffmpeg"));
        }
        let base = manifest.parent().unwrap_or(Path::new("."));
        let listing = std::fs::read_to_string(manifest).map_err(io_failure)?;

        let mut joined = Vec::new();
        for line in listing.lines() {
            let Some(name) = line
                .strip_prefix("file '")
                .and_then(|rest| rest.strip_suffix('\''))
            else {
                continue;
            };
            joined.extend(std::fs::read(base.join(name)).map_err(io_failure)?);
        }
        std::fs::write(output, joined).map_err(io_failure)
    }

    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
    ) -> std::result::Result<(), ToolError> {
        if self.fail_mux {
            // ffmpeg leaves a truncated container behind when it dies mid-write.
            std::fs::write(output, b"partial").map_err(io_failure)?;
            return Err(tool_failure("ffmpeg"));
        }
        let mut combined = std::fs::read(video).map_err(io_failure)?;
        combined.push(b'+');
        combined.extend(std::fs::read(audio).map_err(io_failure)?);
        std::fs::write(output, combined).map_err(io_failure)
    }
}

pub struct StubOcr {
    text: String,
}

impl StubOcr {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl OcrEngine for StubOcr {
    async fn extract(&self, image: &Path) -> Result<String> {
        assert!(image.exists(), "upload must exist during extraction");
        Ok(self.text.trim().to_string())
    }
}

/// A completion that follows the output contract: fenced code plus a
/// two-segment narration block.
pub const WELL_FORMED_COMPLETION: &str = r#"Here is your animation.

```python
from manim import *

class CircleToSquare(Scene):
    def construct(self):
        circle = Circle()
        self.play(Create(circle))
        self.play(Transform(circle, Square()))
```

# NARRATION_DATA
TOTAL_DURATION: 6
SEGMENTS: [
  {"start_time": 0, "duration": 3, "text": "We begin by drawing a circle on screen.", "word_count": 8},
  {"start_time": 3, "duration": 3, "text": "Then the circle turns into a square shape.", "word_count": 8}
]
"#;
