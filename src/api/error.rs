use axum::{
    Json,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use crate::errors::AppError;

/// Handler error: the failure plus the route's client-facing label.
#[derive(Debug)]
pub struct ApiError {
    label: &'static str,
    source: AppError,
}

impl ApiError {
    pub fn new(label: &'static str, source: AppError) -> Self {
        Self { label, source }
    }

    /// `map_err` adapter for a route.
    pub fn labelled(label: &'static str) -> impl Fn(AppError) -> ApiError {
        move |source| ApiError::new(label, source)
    }
}

fn size_label(limit: usize) -> String {
    const MIB: usize = 1024 * 1024;
    if limit >= MIB && limit % MIB == 0 {
        format!("{}MB", limit / MIB)
    } else {
        format!("{limit} bytes")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.source.status();

        let body = match &self.source {
            AppError::FileType(_) => json!({
                "error": "Invalid file type",
                "details": "Only image files (jpg, png, gif, etc.) are allowed",
            }),
            AppError::FileSize { limit } => json!({
                "error": "File too large",
                "details": format!("Image file size must be less than {}", size_label(*limit)),
            }),
            AppError::EmptyExtraction => json!({
                "error": "No text could be extracted from the image",
                "details": "Please ensure the image contains readable text",
            }),
            AppError::NotFound(name) => json!({
                "error": "Video not found",
                "details": format!("{name} does not exist"),
            }),
            AppError::InvalidInput(message) => json!({ "error": message }),
            source => {
                error!(target: "api", route = self.label, error = %source, "request failed");
                json!({
                    "error": self.label,
                    "details": source.public_details(),
                })
            }
        };

        (status, Json(body)).into_response()
    }
}
