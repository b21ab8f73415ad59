use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::responses::RequestMeta;

pub const E_NOT_FOUND: &str = "NOT_FOUND";
pub const E_INVALID_STATE: &str = "INVALID_STATE";
pub const E_BUSINESS_RULE: &str = "BUSINESS_RULE";
pub const E_NO_WALLETS: &str = "NO_ACTIVE_WALLETS";
pub const E_DB_FAILURE: &str = "DB_FAILURE";

/// Result type for core operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

/// Failures of the license, order, ledger and commission operations.
///
/// Every variant carries enough context for a caller to render a useful
/// message; nothing is committed when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} {id} is {current}, expected {expected}")]
    InvalidState {
        entity: &'static str,
        id: Uuid,
        current: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Rule(#[from] RuleViolation),

    #[error("no active wallets available for assignment")]
    NoActiveWallets,

    #[error("infrastructure failure: {0}")]
    Infrastructure(#[source] anyhow::Error),
}

/// Business rules that block an otherwise valid operation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleViolation {
    #[error("license {license_id} already reached its cap or maximum days")]
    AlreadyAtCap { license_id: Uuid },

    #[error("license {license_id} has not been active for 24 hours yet")]
    ActivationWindowOpen { license_id: Uuid },

    #[error("day {day_index} of license {license_id} is not due yet")]
    EarningDateInFuture { license_id: Uuid, day_index: i32 },

    #[error("day {day_index} of license {license_id} was already processed")]
    DayAlreadyProcessed { license_id: Uuid, day_index: i32 },

    #[error("{requested} days exceeds the maximum of {maximum}")]
    DaysExceedMaximum { requested: i32, maximum: i32 },

    #[error("new start time would be more than 24 hours in the future")]
    StartTooFarInFuture,

    #[error("user {user_id} already has an open order {order_id}")]
    OpenOrderExists { user_id: Uuid, order_id: Uuid },

    #[error("order {order_id} passed its payment deadline")]
    OrderDeadlinePassed { order_id: Uuid },

    #[error("transaction hash is already attached to another order")]
    DuplicateTxHash,

    #[error("amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("balance {balance} is lower than requested {requested}")]
    InsufficientBalance { balance: Decimal, requested: Decimal },

    #[error("product {product_id} is referenced by orders or licenses")]
    ProductInUse { product_id: Uuid },

    #[error("product {product_id} is not available for purchase")]
    InactiveProduct { product_id: Uuid },

    #[error("user {user_id} is not active")]
    InactiveUser { user_id: Uuid },

    #[error("ledger entry {entry_id} was already reversed")]
    AlreadyReversed { entry_id: Uuid },

    #[error("{0}")]
    InvalidInput(String),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(
        entity: &'static str,
        id: Uuid,
        current: impl ToString,
        expected: &'static str,
    ) -> Self {
        Self::InvalidState {
            entity,
            id,
            current: current.to_string(),
            expected,
        }
    }

    /// The business rule behind this error, if any.
    pub fn rule(&self) -> Option<&RuleViolation> {
        match self {
            Self::Rule(rule) => Some(rule),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Infrastructure(e.into())
    }
}

impl From<sqlx::migrate::MigrateError> for CoreError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        Self::Infrastructure(e.into())
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Unprocessable(String),
    Unavailable(String),
    Internal(anyhow::Error),
}

#[derive(Debug)]
pub struct ApiErrorWithMeta {
    error: ApiError,
    meta: RequestMeta,
    code: Option<String>,
}

impl ApiError {
    pub fn with_meta(self, meta: RequestMeta) -> ApiErrorWithMeta {
        ApiErrorWithMeta {
            error: self,
            meta,
            code: None,
        }
    }
}

impl ApiErrorWithMeta {
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    /// Maps a core failure onto its HTTP class and stable code.
    pub fn from_core(e: CoreError, meta: RequestMeta) -> Self {
        let (error, code) = match e {
            CoreError::NotFound { .. } => (ApiError::NotFound(e.to_string()), E_NOT_FOUND),
            CoreError::InvalidState { .. } => (ApiError::Conflict(e.to_string()), E_INVALID_STATE),
            CoreError::Rule(RuleViolation::InvalidInput(msg)) => {
                (ApiError::BadRequest(msg), E_BUSINESS_RULE)
            }
            CoreError::Rule(rule) => (ApiError::Unprocessable(rule.to_string()), E_BUSINESS_RULE),
            CoreError::NoActiveWallets => {
                error!("order creation blocked: wallet pool is empty");
                (ApiError::Unavailable(e.to_string()), E_NO_WALLETS)
            }
            CoreError::Infrastructure(inner) => (ApiError::Internal(inner), E_DB_FAILURE),
        };
        error.with_meta(meta).with_code(code)
    }
}

impl IntoResponse for ApiErrorWithMeta {
    fn into_response(self) -> Response {
        let (status, error_message) = match self.error {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(e) => {
                error!("internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };

        let mut body = json!({
            "request_id": self.meta.request_id,
            "error": error_message,
        });
        if let Some(code) = self.code {
            body["code"] = json!(code);
        }

        (status, Json(body)).into_response()
    }
}
