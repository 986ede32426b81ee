use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::info;

use crate::{
    errors::{AppError, Result},
    pipeline::media::MediaTool,
};

pub struct Muxer {
    media: Arc<dyn MediaTool>,
}

impl Muxer {
    pub fn new(media: Arc<dyn MediaTool>) -> Self {
        Self { media }
    }

    /// Write `<stem>_with_audio.mp4` next to `video`.
    pub async fn combine(&self, video: &Path, audio: &Path) -> Result<PathBuf> {
        let stem = video
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::narration("video path has no file name"))?;
        let output = video.with_file_name(format!("{stem}_with_audio.mp4"));

        if let Err(err) = self.media.mux(video, audio, &output).await {
            let _ = tokio::fs::remove_file(&output).await;
            return Err(AppError::narration(format!("mux: {}", err.summary())));
        }

        info!(target: "mux", output = ?output, "video and narration combined");
        Ok(output)
    }
}
