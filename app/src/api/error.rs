use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::*;
use serde::Serialize;

use infra::persistence::ConcurrencyError;

use crate::inventory::InventoryError;
use crate::menu::MenuError;
use crate::orders::OrderError;
use crate::users::UserError;

/// Wraps whatever a service call returned and maps it onto an HTTP status
/// plus the `{"success": false, "message": ...}` envelope.
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        if let Some(e) = self.0.downcast_ref::<MenuError>() {
            return match e {
                MenuError::NotFound => StatusCode::NOT_FOUND,
                MenuError::DuplicateName(_) => StatusCode::CONFLICT,
                MenuError::InvalidPrice => StatusCode::BAD_REQUEST,
            };
        }
        if let Some(e) = self.0.downcast_ref::<InventoryError>() {
            return match e {
                InventoryError::NotFound => StatusCode::NOT_FOUND,
                InventoryError::DuplicateName(_) => StatusCode::CONFLICT,
                InventoryError::InvalidQuantity | InventoryError::InvalidStock => {
                    StatusCode::BAD_REQUEST
                }
            };
        }
        if let Some(e) = self.0.downcast_ref::<OrderError>() {
            return match e {
                OrderError::NotFound => StatusCode::NOT_FOUND,
                OrderError::AlreadyClosed | OrderError::SequenceContention => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            };
        }
        if let Some(e) = self.0.downcast_ref::<UserError>() {
            return match e {
                UserError::NotFound => StatusCode::NOT_FOUND,
                UserError::DuplicateUsername(_) | UserError::LastAdmin => StatusCode::CONFLICT,
                UserError::BadCredentials => StatusCode::UNAUTHORIZED,
                UserError::Inactive => StatusCode::FORBIDDEN,
                UserError::WeakPassword => StatusCode::BAD_REQUEST,
            };
        }
        if self.0.is::<ConcurrencyError>() {
            return StatusCode::CONFLICT;
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Internal error: {:?}", self.0);
            "internal error".to_string()
        } else {
            debug!("Request failed: {}", self.0);
            self.0.to_string()
        };
        let body = ErrorBody {
            success: false,
            message,
        };
        (status, Json(body)).into_response()
    }
}
