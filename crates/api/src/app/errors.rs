use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use warehousing_core::DomainError;
use warehousing_infra::{DirectoryError, LedgerError, ReservationError};

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Like [`json_error`], naming the zero-based request line at fault.
pub fn json_line_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    line: usize,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
            "line": line,
        })),
    )
        .into_response()
}

pub fn reservation_error_to_response(err: ReservationError) -> axum::response::Response {
    let status = match &err {
        ReservationError::Validation(_) => StatusCode::BAD_REQUEST,
        ReservationError::WarehouseNotFound { .. } => StatusCode::NOT_FOUND,
        ReservationError::ProductNotInWarehouse { .. } => StatusCode::NOT_FOUND,
        ReservationError::WarehouseUnavailable { .. } => StatusCode::CONFLICT,
        ReservationError::InsufficientStock { .. } | ReservationError::OverRelease { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ReservationError::ConcurrencyConflict { .. } => StatusCode::CONFLICT,
        ReservationError::RecordNotFound(_) => StatusCode::NOT_FOUND,
        ReservationError::InvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ReservationError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    match err.line() {
        Some(line) => json_line_error(status, err.code(), err.to_string(), line),
        None => json_error(status, err.code(), err.to_string()),
    }
}

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    match err {
        LedgerError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        LedgerError::ConcurrencyConflict(msg) => {
            json_error(StatusCode::CONFLICT, "concurrency_conflict", msg)
        }
        LedgerError::Stock(e) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", e.to_string())
        }
        LedgerError::Constraint(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        LedgerError::StorageUnavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable", msg)
        }
    }
}

pub fn directory_error_to_response(err: DirectoryError) -> axum::response::Response {
    match err {
        DirectoryError::Invalid(e) => domain_error_to_response(e),
        DirectoryError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, "not_found", msg),
        DirectoryError::Duplicate(msg) => json_error(StatusCode::CONFLICT, "duplicate", msg),
        DirectoryError::Unavailable(msg) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable", msg)
        }
    }
}

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    match err {
        DomainError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
    }
}
