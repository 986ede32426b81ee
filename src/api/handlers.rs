use axum::{
    Json,
    extract::{
        Multipart, Path, State,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::{AppState, error::ApiError};
use crate::{
    errors::AppError,
    orchestrator::{GenerationOutcome, GenerationRequest},
    util::ImageUpload,
};

type ApiResult<T> = std::result::Result<T, ApiError>;

const GENERATE_VIDEO: &str = "Failed to generate video";
const GENERATE_FROM_IMAGE: &str = "Failed to generate video from image";
const EXTRACT_TEXT: &str = "Failed to extract text from image";
const GENERATE_CODE: &str = "Failed to generate code";
const LIST_VIDEOS: &str = "Failed to list videos";
const DELETE_VIDEO: &str = "Failed to delete video";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptBody {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    include_narration: Option<Value>,
}

/// Form and JSON flags arrive as booleans, numbers or strings.
pub fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "false" | "0" | "no" | "off"
    )
}

fn flag_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64() != Some(0.0),
        Some(Value::String(text)) => parse_flag(text),
        Some(_) => true,
    }
}

fn required_prompt(
    body: std::result::Result<Json<PromptBody>, JsonRejection>,
    label: &'static str,
) -> ApiResult<(String, bool)> {
    let Json(body) = body.map_err(|rejection| {
        ApiError::new(label, AppError::invalid(rejection.body_text()))
    })?;

    let prompt = body
        .prompt
        .filter(|prompt| !prompt.trim().is_empty())
        .ok_or_else(|| ApiError::new(label, AppError::invalid("Prompt is required")))?;

    Ok((prompt, flag_value(body.include_narration.as_ref())))
}

struct ImageForm {
    image: Option<ImageUpload>,
    include_narration: bool,
    additional_prompt: Option<String>,
}

fn multipart_error(err: MultipartError, limit: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::FileSize { limit }
    } else {
        AppError::invalid(err.body_text())
    }
}

async fn read_image_form(
    multipart: std::result::Result<Multipart, MultipartRejection>,
    limit: usize,
) -> std::result::Result<ImageForm, AppError> {
    let mut multipart =
        multipart.map_err(|rejection| AppError::invalid(rejection.body_text()))?;

    let mut form = ImageForm {
        image: None,
        include_narration: true,
        additional_prompt: None,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| multipart_error(err, limit))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|err| multipart_error(err, limit))?;
                form.image = Some(ImageUpload {
                    file_name,
                    content_type,
                    data,
                });
            }
            "includeNarration" => {
                let value = field.text().await.map_err(|err| multipart_error(err, limit))?;
                form.include_narration = parse_flag(&value);
            }
            "additionalPrompt" => {
                let value = field.text().await.map_err(|err| multipart_error(err, limit))?;
                form.additional_prompt = Some(value).filter(|text| !text.trim().is_empty());
            }
            _ => {}
        }
    }

    Ok(form)
}

fn required_image(form: &mut ImageForm, limit: usize) -> std::result::Result<ImageUpload, AppError> {
    let image = form
        .image
        .take()
        .ok_or_else(|| AppError::invalid("Image file is required"))?;
    image.validate(limit)?;
    Ok(image)
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "OK",
        "message": "Manim server with narration and OCR is running",
    }))
}

pub async fn generate_video(
    State(state): State<AppState>,
    body: std::result::Result<Json<PromptBody>, JsonRejection>,
) -> ApiResult<Json<GenerationOutcome>> {
    let (prompt, include_narration) = required_prompt(body, GENERATE_VIDEO)?;
    info!(target: "api", route = "/generate-video", include_narration, "request received");

    let outcome = state
        .orchestrator
        .generate(GenerationRequest::new(prompt).with_narration(include_narration))
        .await
        .map_err(ApiError::labelled(GENERATE_VIDEO))?;

    Ok(Json(outcome))
}

pub async fn generate_video_from_image(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<GenerationOutcome>> {
    let labelled = ApiError::labelled(GENERATE_FROM_IMAGE);
    let mut form = read_image_form(multipart, state.max_upload_bytes)
        .await
        .map_err(&labelled)?;
    let image = required_image(&mut form, state.max_upload_bytes).map_err(&labelled)?;
    info!(target: "api", route = "/generate-video-from-image", file = ?image.file_name, "request received");

    let outcome = state
        .orchestrator
        .generate_from_image(image, form.include_narration, form.additional_prompt)
        .await
        .map_err(&labelled)?;

    Ok(Json(outcome))
}

pub async fn extract_text(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<Value>> {
    let labelled = ApiError::labelled(EXTRACT_TEXT);
    let mut form = read_image_form(multipart, state.max_upload_bytes)
        .await
        .map_err(&labelled)?;
    let image = required_image(&mut form, state.max_upload_bytes).map_err(&labelled)?;

    let extraction = state
        .orchestrator
        .extract_text(image)
        .await
        .map_err(&labelled)?;

    Ok(Json(json!({
        "success": true,
        "extractedText": extraction.text,
        "wordCount": extraction.word_count,
        "message": "Text extracted successfully from image",
    })))
}

pub async fn generate_code(
    State(state): State<AppState>,
    body: std::result::Result<Json<PromptBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let (prompt, _) = required_prompt(body, GENERATE_CODE)?;

    let parsed = state
        .orchestrator
        .generate_code(&prompt)
        .await
        .map_err(ApiError::labelled(GENERATE_CODE))?;

    Ok(Json(json!({
        "success": true,
        "code": parsed.script.code,
        "sceneName": parsed.script.scene_name,
        "narrationData": parsed.narration,
    })))
}

pub async fn list_videos(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let names = state
        .store
        .list_videos()
        .await
        .map_err(ApiError::labelled(LIST_VIDEOS))?;
    let videos: Vec<String> = names.iter().map(|name| format!("/videos/{name}")).collect();

    Ok(Json(json!({
        "success": true,
        "count": videos.len(),
        "videos": videos,
    })))
}

pub async fn delete_video(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> ApiResult<Json<Value>> {
    state
        .store
        .delete_video(&filename)
        .await
        .map_err(ApiError::labelled(DELETE_VIDEO))?;

    Ok(Json(json!({
        "success": true,
        "message": "Video deleted successfully",
    })))
}
