//! Usage: Standardized gateway error responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

pub(crate) fn error_response(status: StatusCode, code: &'static str) -> Response {
    (status, Json(serde_json::json!({ "error": code }))).into_response()
}

/// Maps domain-layer `CODE: message` errors onto the wire contract.
pub(crate) fn domain_error(err: &str) -> Response {
    let code = err.split(':').next().unwrap_or("");
    let resp = match code {
        "DB_NOT_FOUND" => error_response(StatusCode::NOT_FOUND, "not_found"),
        "DB_CONSTRAINT" => error_response(StatusCode::CONFLICT, "name_exists"),
        "SEC_INVALID_INPUT" => error_response(StatusCode::BAD_REQUEST, "invalid_payload"),
        _ => error_response(StatusCode::INTERNAL_SERVER_ERROR, "db_error"),
    };
    if code != "DB_NOT_FOUND" && code != "DB_CONSTRAINT" && code != "SEC_INVALID_INPUT" {
        tracing::error!(error = %err, "internal error");
    }
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_by_prefix() {
        assert_eq!(
            domain_error("DB_NOT_FOUND: provider not found").status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            domain_error("DB_CONSTRAINT: provider already exists").status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            domain_error("SEC_INVALID_INPUT: bad").status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            domain_error("DB_ERROR: boom").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
