//! Error taxonomy for the billing-cycle engine.

use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum BillingError {
    /// Client billing parameters that the accrual or calendar math cannot use.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Permission denied: user {actor} does not own client {client_id}")]
    PermissionDenied { actor: Uuid, client_id: Uuid },

    #[error("Client not found: {0}")]
    NotFound(Uuid),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid transition: client {client_id} is already {state}")]
    InvalidTransition {
        client_id: Uuid,
        state: &'static str,
    },

    /// Delivery failed or timed out. Billing fields are never touched.
    #[error("Dispatch failure: {0}")]
    DispatchFailure(String),

    #[error("Persistence failure: {0}")]
    PersistenceFailure(String),
}

impl BillingError {
    /// Short label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BillingError::InvalidConfiguration(_) => "invalid_configuration",
            BillingError::PermissionDenied { .. } => "permission_denied",
            BillingError::NotFound(_) => "not_found",
            BillingError::Conflict(_) => "conflict",
            BillingError::InvalidTransition { .. } => "invalid_transition",
            BillingError::DispatchFailure(_) => "dispatch_failure",
            BillingError::PersistenceFailure(_) => "persistence_failure",
        }
    }
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::InvalidConfiguration(_) => {
                AppError::Unprocessable(anyhow::Error::new(err))
            }
            BillingError::PermissionDenied { .. } => AppError::Forbidden(anyhow::Error::new(err)),
            BillingError::NotFound(_) => AppError::NotFound(anyhow::Error::new(err)),
            BillingError::Conflict(_) | BillingError::InvalidTransition { .. } => {
                AppError::Conflict(anyhow::Error::new(err))
            }
            BillingError::DispatchFailure(msg) => AppError::BadGateway(msg),
            BillingError::PersistenceFailure(_) => {
                AppError::PersistenceError(anyhow::Error::new(err))
            }
        }
    }
}
