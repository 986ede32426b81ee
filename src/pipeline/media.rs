//! Audio/video operations backed by `ffmpeg`.

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;

use crate::{
    config::MediaConfig,
    pipeline::process::{ToolError, run_tool},
};

#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Write `seconds` of stereo silence to `output`.
    async fn silence(&self, output: &Path, seconds: f64) -> Result<(), ToolError>;

    /// Join the files listed in an ffmpeg concat manifest without re-encoding.
    async fn concat(&self, manifest: &Path, output: &Path) -> Result<(), ToolError>;

    /// Copy the video stream, encode the audio stream, stop at the shorter input.
    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), ToolError>;
}

pub struct FfmpegTool {
    program: String,
    timeout: Option<Duration>,
}

impl FfmpegTool {
    pub fn new(config: &MediaConfig) -> Self {
        Self {
            program: config.ffmpeg.clone(),
            timeout: config.timeout,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(["-hide_banner", "-loglevel", "error", "-y"]);
        cmd
    }
}

#[async_trait]
impl MediaTool for FfmpegTool {
    async fn silence(&self, output: &Path, seconds: f64) -> Result<(), ToolError> {
        let mut cmd = self.command();
        cmd.args(["-f", "lavfi", "-i", "anullsrc=r=44100:cl=stereo", "-t"])
            .arg(format!("{seconds:.3}"))
            .args(["-q:a", "9", "-acodec", "libmp3lame"])
            .arg(output);
        run_tool(&mut cmd, self.timeout).await.map(|_| ())
    }

    async fn concat(&self, manifest: &Path, output: &Path) -> Result<(), ToolError> {
        let mut cmd = self.command();
        cmd.args(["-f", "concat", "-safe", "0", "-i"])
            .arg(manifest)
            .args(["-c", "copy"])
            .arg(output);
        run_tool(&mut cmd, self.timeout).await.map(|_| ())
    }

    async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), ToolError> {
        let mut cmd = self.command();
        cmd.arg("-i")
            .arg(video)
            .arg("-i")
            .arg(audio)
            .args(["-c:v", "copy", "-c:a", "aac", "-shortest"])
            .arg(output);
        run_tool(&mut cmd, self.timeout).await.map(|_| ())
    }
}
