use thiserror::Error;

use crate::domain::customer::CustomerId;

/// Closed failure taxonomy for sync and analysis operations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("customer profile `{0}` was not found")]
    NotFound(CustomerId),
    #[error("analysis engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("analysis engine returned a malformed response: {reason}")]
    MalformedResponse { reason: String, raw: String },
    #[error("concurrent write conflict on customer profile `{0}`")]
    StoreConflict(CustomerId),
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl AnalysisError {
    /// Whether the caller may reasonably try the same request again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::EngineUnavailable(_) | Self::StoreConflict(_))
    }

    /// Short machine-readable class used in logs and CLI output.
    pub fn class(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::EngineUnavailable(_) => "engine_unavailable",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::StoreConflict(_) => "store_conflict",
            Self::Persistence(_) => "persistence",
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::NotFound { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::BadGateway { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("bad gateway: {message}")]
    BadGateway { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested customer does not exist.",
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::BadGateway { .. } => {
                "The analysis engine returned an unusable response. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::ServiceUnavailable { .. } => 503,
            Self::BadGateway { .. } => 502,
            Self::Internal { .. } => 500,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::BadGateway { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl From<AnalysisError> for InterfaceError {
    fn from(value: AnalysisError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            AnalysisError::NotFound(id) => {
                Self::NotFound { message: format!("customer `{id}` not found"), correlation_id }
            }
            error @ (AnalysisError::EngineUnavailable(_) | AnalysisError::StoreConflict(_)) => {
                Self::ServiceUnavailable { message: error.to_string(), correlation_id }
            }
            error @ AnalysisError::MalformedResponse { .. } => {
                Self::BadGateway { message: error.to_string(), correlation_id }
            }
            AnalysisError::Persistence(message) => Self::Internal { message, correlation_id },
        }
    }
}
