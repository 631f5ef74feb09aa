use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use packbattle_types::api::{BattleStatusResponse, ErrorBody};
use packbattle_types::{EngineError, ErrorKind};

#[derive(Debug)]
pub(super) enum ApiError {
    Engine {
        err: EngineError,
        state: Option<BattleStatusResponse>,
    },
    Unauthenticated,
    Unauthorized,
    BadRequest(String),
    Internal(String),
}

impl ApiError {
    pub(super) fn internal(err: impl std::fmt::Display) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// HTTP status for an engine error.
pub(super) fn status_for(err: &EngineError) -> StatusCode {
    match (err.kind(), err) {
        (_, EngineError::RateSumInvalid { .. }) => StatusCode::CONFLICT,
        (_, EngineError::IdempotencyConflict { .. }) => StatusCode::CONFLICT,
        (ErrorKind::Validation, _) => StatusCode::BAD_REQUEST,
        (ErrorKind::Economic, _) => StatusCode::PAYMENT_REQUIRED,
        (ErrorKind::State, _) => StatusCode::CONFLICT,
        (ErrorKind::Authorization, _) => StatusCode::FORBIDDEN,
        (ErrorKind::NotFound, _) => StatusCode::NOT_FOUND,
        (ErrorKind::Internal, _) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Engine { err, state } => {
                let message = match err.kind() {
                    ErrorKind::Internal => "internal error".to_string(),
                    _ => err.to_string(),
                };
                (
                    status_for(&err),
                    ErrorBody {
                        code: err.code().to_string(),
                        message,
                        state,
                    },
                )
            }
            ApiError::Unauthenticated => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "Unauthenticated".to_string(),
                    message: "missing x-user-id header".to_string(),
                    state: None,
                },
            ),
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "Unauthorized".to_string(),
                    message: "admin token required".to_string(),
                    state: None,
                },
            ),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "BadRequest".to_string(),
                    message,
                    state: None,
                },
            ),
            ApiError::Internal(message) => {
                tracing::error!(error = %message, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "Internal".to_string(),
                        message: "internal error".to_string(),
                        state: None,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_kinds_to_statuses() {
        let cases = [
            (EngineError::InvalidAmount(0), StatusCode::BAD_REQUEST),
            (
                EngineError::RateSumInvalid {
                    sum_thousandths: 99_000,
                },
                StatusCode::CONFLICT,
            ),
            (
                EngineError::InsufficientFunds {
                    needed: 5,
                    available: 1,
                },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (
                EngineError::IdempotencyConflict { key: "k".into() },
                StatusCode::CONFLICT,
            ),
            (EngineError::BattleFull { battle_id: 1 }, StatusCode::CONFLICT),
            (EngineError::NotAuthorized, StatusCode::FORBIDDEN),
            (EngineError::BattleNotFound(9), StatusCode::NOT_FOUND),
            (
                EngineError::storage("disk"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "{err}");
        }
    }
}
