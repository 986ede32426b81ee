use std::{path::Path, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::{
    config::OcrConfig,
    errors::{AppError, Result},
    pipeline::process::run_tool,
};

/// Reads the text printed in an image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn extract(&self, image: &Path) -> Result<String>;
}

pub struct TesseractOcr {
    program: String,
    language: String,
    timeout: Option<Duration>,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            program: config.program.clone(),
            language: config.language.clone(),
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    async fn extract(&self, image: &Path) -> Result<String> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(image).arg("stdout").arg("-l").arg(&self.language);

        let output = run_tool(&mut cmd, self.timeout)
            .await
            .map_err(|err| AppError::Ocr(err.summary()))?;

        if !output.stderr.trim().is_empty() {
            debug!(target: "ocr", stderr = %output.stderr.trim(), "tesseract diagnostics");
        }

        let text = output.stdout.trim().to_string();
        let preview: String = text.chars().take(200).collect();
        info!(target: "ocr", chars = text.len(), %preview, "text extracted");

        Ok(text)
    }
}
