// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;

use crate::model::ApiResponse;

/// Error codes for the directory API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    BadRequest,
    KeyNotFound,
    Internal,
}

impl ApiError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::KeyNotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Build the `{success, message}` response envelope for this error.
    pub fn to_http_response(self, message: impl Into<String>) -> (StatusCode, Json<ApiResponse>) {
        (self.http_status(), Json(ApiResponse { success: false, message: message.into() }))
    }
}
