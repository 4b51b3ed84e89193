pub mod admin;
pub mod search;
pub mod server;

use serde::Serialize;

#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 200,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            code: 400,
            message: message.to_string(),
            data: None,
        }
    }

    /// Failure envelope that still carries a well-formed empty payload, so
    /// clients never have to branch on a missing body / 失败时仍携带空载荷
    pub fn failure(message: &str, data: T) -> Self {
        Self {
            code: 500,
            message: message.to_string(),
            data: Some(data),
        }
    }
}
