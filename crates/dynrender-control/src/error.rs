use std::collections::BTreeMap;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use dynrender_engine::RenderError;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub request_id: String,
    pub field_errors: BTreeMap<String, String>,
    pub hint: Option<String>,
}

impl ApiError {
    pub fn new(request_id: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            request_id: request_id.to_string(),
            field_errors: BTreeMap::new(),
            hint: None,
        }
    }

    pub fn with_field(mut self, field: &str, error: impl Into<String>) -> Self {
        self.field_errors.insert(field.to_string(), error.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn from_render(request_id: &str, err: &RenderError) -> Self {
        let api = Self::new(request_id, err.code(), err.to_string());
        if let RenderError::Store(_) = err {
            tracing::error!(request_id, error = %err, "settings store failure");
        }
        api
    }

    pub fn status(&self) -> StatusCode {
        match self.code.as_str() {
            "invalid_param" => StatusCode::BAD_REQUEST,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "forbidden" => StatusCode::FORBIDDEN,
            "not_found" => StatusCode::NOT_FOUND,
            "conflict" => StatusCode::CONFLICT,
            "shutting_down" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}
