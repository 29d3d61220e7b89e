/// Trust Chain Validation
///
/// A candidate chain (index 0 = leaf, last = trust anchor configuration) is
/// run through independent validation steps. Steps never fail fast: each
/// returns every violation it finds and the caller decides pass/fail.

pub mod steps;

pub use steps::{ConstraintStep, CriticalClaimsStep, SignatureStep};

use crate::statement::EntityStatement;
use chrono::Utc;
use jsonwebtoken::jwk::JwkSet;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Allowed clock skew on `iat`, in seconds
pub const CLOCK_SKEW_SECS: i64 = 15;

/// Critical claims this resolver understands
pub const SUPPORTED_CRITICAL_CLAIMS: &[&str] = &["subject_entity_configuration_location"];

/// Metadata policy operators this resolver understands
pub const SUPPORTED_POLICY_OPERATORS: &[&str] = &["regexp", "intersects"];

/// A single problem found in a candidate chain
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChainViolation {
    #[error("trust chain is empty")]
    EmptyChain,

    #[error("statement {index}: issuer {issuer} does not match next subject {next_subject}")]
    BrokenLink {
        index: usize,
        issuer: String,
        next_subject: String,
    },

    #[error("statement {index} ({subject}): invalid signature: {reason}")]
    InvalidSignature {
        index: usize,
        subject: String,
        reason: String,
    },

    #[error("statement {index} ({subject}) is not self-signed")]
    NotSelfSigned { index: usize, subject: String },

    #[error("trust anchor {subject} does not verify against the trusted keys: {reason}")]
    UntrustedAnchor { subject: String, reason: String },

    #[error("statement {index} ({subject}) is not valid yet")]
    NotYetValid { index: usize, subject: String },

    #[error("statement {index} ({subject}) has expired")]
    Expired { index: usize, subject: String },

    #[error("statement {index}: {actual} intermediates exceed max_path_length {max}")]
    MaxPathLengthExceeded {
        index: usize,
        max: usize,
        actual: usize,
    },

    #[error("statement {index}: subject {subject} is not permitted by naming constraints")]
    SubjectNotPermitted { index: usize, subject: String },

    #[error("statement {index}: subject {subject} is excluded by prefix {prefix}")]
    SubjectExcluded {
        index: usize,
        subject: String,
        prefix: String,
    },

    #[error("statement {index}: leaf entity type {entity_type} is not allowed")]
    LeafEntityTypeNotAllowed { index: usize, entity_type: String },

    #[error("statement {index}: unsupported critical claim {claim}")]
    UnsupportedCriticalClaim { index: usize, claim: String },

    #[error("statement {index}: unsupported metadata policy operator {operator}")]
    UnsupportedPolicyOperator { index: usize, operator: String },
}

/// Inputs shared by all steps of one validation run
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext {
    /// Evaluation time, seconds since the epoch
    pub now: i64,
}

/// One independent check over a leaf-first chain
pub trait ValidationStep: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, chain: &[EntityStatement], ctx: &ValidationContext) -> Vec<ChainViolation>;
}

/// Validation pipeline
pub struct TrustChainValidator {
    steps: Vec<Box<dyn ValidationStep>>,
}

impl TrustChainValidator {
    /// Standard pipeline: signatures, constraints, critical claims
    pub fn new(trusted_keys: JwkSet) -> Self {
        Self::with_steps(vec![
            Box::new(SignatureStep::new(trusted_keys)),
            Box::new(ConstraintStep),
            Box::new(CriticalClaimsStep),
        ])
    }

    pub fn with_steps(steps: Vec<Box<dyn ValidationStep>>) -> Self {
        Self { steps }
    }

    /// Validate against the current time
    pub fn validate(&self, chain: &[EntityStatement]) -> Vec<ChainViolation> {
        self.validate_at(chain, Utc::now().timestamp())
    }

    /// Validate as of `now` (seconds since the epoch)
    pub fn validate_at(&self, chain: &[EntityStatement], now: i64) -> Vec<ChainViolation> {
        let ctx = ValidationContext { now };

        self.steps
            .iter()
            .flat_map(|step| {
                let violations = step.validate(chain, &ctx);
                if !violations.is_empty() {
                    debug!(
                        "Validation step {} found {} violation(s)",
                        step.name(),
                        violations.len()
                    );
                }
                violations
            })
            .collect()
    }
}
