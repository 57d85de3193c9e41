pub mod audit;
pub mod dispatcher;
pub mod handlers;
pub mod middleware;
pub mod requests;
pub mod routes;
pub mod selections;
pub mod ws;

use axum::{http::StatusCode, Json};
use serde::Serialize;
use tracing::error;

use cadenza_core::SubmissionError;

pub use routes::create_router;
pub use ws::{WsBroadcaster, WsMessage};

/// Error body shared by every endpoint.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable reason, when the caller can act on it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub(crate) fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: None,
        }),
    )
}

fn coded_error(status: StatusCode, code: &'static str, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
            code: Some(code),
        }),
    )
}

/// Map a submission failure to its HTTP shape.
pub(crate) fn submission_error(err: SubmissionError) -> ApiError {
    let message = err.to_string();
    match err {
        SubmissionError::Validation(_) => {
            coded_error(StatusCode::BAD_REQUEST, "invalid_input", message)
        }
        SubmissionError::SelectionPending { .. } => {
            coded_error(StatusCode::CONFLICT, "selection_pending", message)
        }
        SubmissionError::NoPendingSelection => {
            coded_error(StatusCode::NOT_FOUND, "no_selection", message)
        }
        SubmissionError::Listing(_) => {
            coded_error(StatusCode::BAD_GATEWAY, "listing_failed", message)
        }
        SubmissionError::NotFound(_) => coded_error(StatusCode::NOT_FOUND, "not_found", message),
        SubmissionError::NotOwner(_) => coded_error(StatusCode::FORBIDDEN, "not_owner", message),
        SubmissionError::NotCancellable { .. } => {
            coded_error(StatusCode::CONFLICT, "not_cancellable", message)
        }
        SubmissionError::Store(_) | SubmissionError::Pending(_) => {
            error!("Submission storage failure: {}", message);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_core::{RequestStatus, ValidationError};

    #[test]
    fn test_submission_error_status_mapping() {
        let cases = [
            (
                SubmissionError::Validation(ValidationError::EmptyUrl),
                StatusCode::BAD_REQUEST,
            ),
            (SubmissionError::NoPendingSelection, StatusCode::NOT_FOUND),
            (SubmissionError::NotFound(4), StatusCode::NOT_FOUND),
            (SubmissionError::NotOwner(4), StatusCode::FORBIDDEN),
            (
                SubmissionError::NotCancellable {
                    request_id: 4,
                    status: RequestStatus::Completed,
                },
                StatusCode::CONFLICT,
            ),
        ];
        for (err, expected) in cases {
            let (status, _) = submission_error(err);
            assert_eq!(status, expected);
        }
    }

    #[test]
    fn test_coded_error_body() {
        let (_, Json(body)) = submission_error(SubmissionError::NotOwner(9));
        assert_eq!(body.code, Some("not_owner"));
        assert!(body.error.contains('9'));
    }
}
