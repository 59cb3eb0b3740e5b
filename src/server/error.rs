use crate::services::pipeline::PipelineError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::error;
use serde_json::json;

/// JSON error body `{ "error": message }` with a status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// Maps a stage failure. Generation errors are logged and replaced by `failure`.
    pub fn from_pipeline(err: PipelineError, failure: &str) -> Self {
        match err {
            PipelineError::StoryNotFound
            | PipelineError::ImagesNotFound
            | PipelineError::CharacterNotFound(_) => Self::not_found(err.to_string()),
            PipelineError::StageOrder { .. } | PipelineError::StageInProgress(_) => {
                Self::new(StatusCode::CONFLICT, err.to_string())
            }
            PipelineError::Generation(e) => {
                error!("{}: {:#}", failure, e);
                Self::internal(failure)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::{Stage, StoryStatus};
    use anyhow::anyhow;

    #[test]
    fn test_pipeline_error_mapping() {
        let e = ApiError::from_pipeline(PipelineError::StoryNotFound, "Failed");
        assert_eq!((e.status, e.message.as_str()), (StatusCode::NOT_FOUND, "Story not found"));

        let e = ApiError::from_pipeline(PipelineError::ImagesNotFound, "Failed");
        assert_eq!(e.message, "Story or images not found");

        let e = ApiError::from_pipeline(
            PipelineError::StageOrder {
                stage: Stage::Audio,
                status: StoryStatus::OutlineComplete,
            },
            "Failed",
        );
        assert_eq!(e.status, StatusCode::CONFLICT);
        assert_eq!(e.message, "Cannot run audio while story status is outline_complete");

        let e = ApiError::from_pipeline(PipelineError::StageInProgress("7".to_string()), "Failed");
        assert_eq!(e.status, StatusCode::CONFLICT);
        assert_eq!(e.message, "Story 7 already has a stage in progress");

        let e = ApiError::from_pipeline(
            PipelineError::Generation(anyhow!("socket closed")),
            "Failed to generate story outline",
        );
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(e.message, "Failed to generate story outline");
    }
}
