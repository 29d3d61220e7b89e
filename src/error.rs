/// Unified error types for the federation resolver
use crate::chain::ChainViolation;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the resolver
#[derive(Error, Debug)]
pub enum FederationError {
    /// No statement matched the request
    #[error("Not found: {0}")]
    NotFound(String),

    /// The requested trust anchor is not the one this resolver serves
    #[error("Invalid trust anchor: {0}")]
    InvalidTrustAnchor(String),

    /// Malformed request (bad cache key, missing parameter, ...)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Candidate trust chain failed validation
    #[error("Invalid trust chain: {}", format_violations(.0))]
    InvalidChain(Vec<ChainViolation>),

    /// Response signing errors
    #[error("Signing error: {0}")]
    Signing(String),

    /// Remote federation endpoint errors
    #[error("Federation client error: {0}")]
    Client(String),

    /// Entity statement could not be decoded
    #[error("Invalid entity statement: {0}")]
    InvalidStatement(String),

    /// Tree facade errors (unknown parent, missing root)
    #[error("Tree error: {0}")]
    Tree(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FederationError {
    /// Error code as used in federation error responses
    pub fn kind(&self) -> &'static str {
        match self {
            FederationError::NotFound(_) => "not_found",
            FederationError::InvalidTrustAnchor(_) => "invalid_trust_anchor",
            FederationError::InvalidRequest(_) => "invalid_request",
            FederationError::InvalidChain(_) => "invalid_trust_chain",
            FederationError::InvalidStatement(_) => "invalid_metadata",
            FederationError::Client(_) => "temporarily_unavailable",
            FederationError::Signing(_)
            | FederationError::Tree(_)
            | FederationError::Config(_)
            | FederationError::Internal(_) => "server_error",
        }
    }

    /// Build the serializable error body for this error
    pub fn to_response(&self) -> FederationErrorResponse {
        let error_description = match self {
            // Don't leak details
            FederationError::Internal(_) | FederationError::Tree(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        FederationErrorResponse {
            error: self.kind().to_string(),
            error_description,
        }
    }
}

fn format_violations(violations: &[ChainViolation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Federation error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct FederationErrorResponse {
    pub error: String,
    pub error_description: String,
}

impl From<serde_json::Error> for FederationError {
    fn from(err: serde_json::Error) -> Self {
        FederationError::InvalidStatement(err.to_string())
    }
}

impl From<reqwest::Error> for FederationError {
    fn from(err: reqwest::Error) -> Self {
        FederationError::Client(err.to_string())
    }
}

/// Result type alias for resolver operations
pub type FederationResult<T> = Result<T, FederationError>;
