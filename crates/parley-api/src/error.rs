use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::error;

use parley_types::api::ErrorBody;
use parley_types::error::ChatError;

/// Wraps the taxonomy for axum handlers. Storage failures are logged with
/// their source and reported as a generic 500; every other kind maps to its
/// status with the human-readable message.
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            ChatError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ChatError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            ChatError::InvalidArgument(_) => (StatusCode::BAD_REQUEST, "invalid_argument"),
            ChatError::Unauthenticated => (StatusCode::UNAUTHORIZED, "unauthenticated"),
            ChatError::StoreFailure(source) => {
                error!("store failure: {:#}", source);
                (StatusCode::INTERNAL_SERVER_ERROR, "store_failure")
            }
        };

        let body = ErrorBody {
            error: kind.to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Store calls are blocking rusqlite work; run them off the async runtime.
/// A join error means the blocking task panicked, which is a store failure
/// from the caller's point of view.
pub async fn run_blocking<T, F>(f: F) -> Result<T, ChatError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ChatError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ChatError::store(anyhow::anyhow!("blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases = [
            (ChatError::NotFound("conversation"), StatusCode::NOT_FOUND),
            (ChatError::Forbidden, StatusCode::FORBIDDEN),
            (ChatError::InvalidArgument("x"), StatusCode::BAD_REQUEST),
            (ChatError::Unauthenticated, StatusCode::UNAUTHORIZED),
            (
                ChatError::store(anyhow::anyhow!("boom")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            let response = ApiError(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
