use serde::Deserialize;
use thiserror::Error;

/// Code carried in a backend or push service error body. Codes this client
/// does not know decode as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unauthorized,
    NotFound,
    RateLimited,
    #[serde(other)]
    Unknown,
}

/// Error body sent with a non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_and_unknown_codes() {
        let known: ApiError =
            serde_json::from_str(r#"{"code":"rate_limited","message":"slow down"}"#)
                .expect("known code");
        assert_eq!(known.code, ErrorCode::RateLimited);
        assert_eq!(known.to_string(), "RateLimited: slow down");

        let unknown: ApiError =
            serde_json::from_str(r#"{"code":"device_unregistered"}"#).expect("unknown code");
        assert_eq!(unknown.code, ErrorCode::Unknown);
        assert!(unknown.message.is_empty());
    }
}
