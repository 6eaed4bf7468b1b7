/// Standard response envelope shared by every endpoint
use axum::Json;
use serde::{Deserialize, Serialize};

/// `{success, err_code, err_msg, data}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub err_code: i32,
    pub err_msg: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            err_code: 0,
            err_msg: String::new(),
            data: Some(data),
        }
    }

    pub fn error(err_code: i32, err_msg: impl Into<String>) -> Self {
        Self {
            success: false,
            err_code,
            err_msg: err_msg.into(),
            data: None,
        }
    }
}

impl ApiResponse<()> {
    /// Success without payload
    pub fn empty() -> Self {
        Self {
            success: true,
            err_code: 0,
            err_msg: String::new(),
            data: None,
        }
    }
}

/// Wrap a payload in a successful JSON envelope
pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::ok(data))
}
