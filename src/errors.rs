use axum::http::StatusCode;
use thiserror::Error;

use crate::pipeline::process::ToolError;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),

    #[error("{0}")]
    InvalidInput(String),

    #[error("only image files are allowed (got {0})")]
    FileType(String),

    #[error("upload exceeds the {limit} byte limit")]
    FileSize { limit: usize },

    #[error("no text could be extracted from the image")]
    EmptyExtraction,

    #[error("text extraction failed: {0}")]
    Ocr(String),

    #[error("language model request failed: {0}")]
    Model(String),

    #[error("renderer failed: {0}")]
    RenderFailed(String),

    #[error("rendered video not found for output id {0}")]
    RenderArtifactMissing(String),

    #[error("narration failed: {0}")]
    Narration(String),

    #[error("speech synthesis failed: {0}")]
    Speech(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("network request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Other(String),
}

impl AppError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn narration(msg: impl Into<String>) -> Self {
        Self::Narration(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    pub fn render(err: ToolError) -> Self {
        Self::RenderFailed(err.summary())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_)
            | AppError::FileType(_)
            | AppError::FileSize { .. }
            | AppError::EmptyExtraction => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message that is safe to hand back to an HTTP client.
    ///
    /// Collaborator failures keep their own summary; local I/O failures are
    /// collapsed so that filesystem paths stay on the server side.
    pub fn public_details(&self) -> String {
        match self {
            AppError::Io(_) => "a filesystem operation failed".to_string(),
            AppError::Other(_) => "an internal error occurred".to_string(),
            AppError::Reqwest(err) => match err.status() {
                Some(status) => format!("upstream service returned {status}"),
                None => "upstream service unreachable".to_string(),
            },
            other => other.to_string(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}
