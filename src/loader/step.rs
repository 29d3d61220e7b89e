/// Crawl steps and their failure bookkeeping
use crate::error::FederationError;
use crate::statement::EntityStatement;
use std::fmt;

/// One unit of crawl work
#[derive(Debug, Clone)]
pub enum Step {
    /// Fetch the anchor's entity configuration and start a new version
    ResolveRoot { entity_id: String },

    /// List the subordinates of an authority (its entity configuration)
    SubordinateListing { authority: EntityStatement },

    /// Fetch the authority's statement about one subordinate
    FetchSubordinate {
        authority: EntityStatement,
        subordinate_id: String,
    },

    /// Fetch the entity configuration of the subject of a subordinate
    /// statement
    FetchEntityConfiguration { statement: EntityStatement },
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::ResolveRoot { .. } => "ResolveRoot",
            Step::SubordinateListing { .. } => "SubordinateListing",
            Step::FetchSubordinate { .. } => "FetchSubordinate",
            Step::FetchEntityConfiguration { .. } => "FetchEntityConfiguration",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::ResolveRoot { entity_id } => write!(f, "ResolveRoot({})", entity_id),
            Step::SubordinateListing { authority } => {
                write!(f, "SubordinateListing({})", authority.sub)
            }
            Step::FetchSubordinate {
                authority,
                subordinate_id,
            } => write!(f, "FetchSubordinate({} -> {})", authority.sub, subordinate_id),
            Step::FetchEntityConfiguration { statement } => {
                write!(f, "FetchEntityConfiguration({})", statement.sub)
            }
        }
    }
}

/// Failure counter of one step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorContext {
    failures: u32,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn record_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    /// Whether the next attempt should accept a cached response
    pub fn use_cached_value(&self, threshold: u32) -> bool {
        self.failures >= threshold
    }
}

/// A step together with its failure history
#[derive(Debug, Clone)]
pub struct PendingStep {
    pub step: Step,
    pub error_context: ErrorContext,
}

impl PendingStep {
    pub fn new(step: Step) -> Self {
        Self {
            step,
            error_context: ErrorContext::new(),
        }
    }
}

/// A failed step handed to the recovery strategy
#[derive(Debug)]
pub struct StepExecutionError {
    pub name: String,
    pub step: Step,
    pub error_context: ErrorContext,
    pub error: FederationError,
}

impl StepExecutionError {
    /// Record the failure on the step's context
    pub fn new(pending: PendingStep, error: FederationError) -> Self {
        let PendingStep {
            step,
            mut error_context,
        } = pending;
        error_context.record_failure();

        Self {
            name: step.to_string(),
            step,
            error_context,
            error,
        }
    }

    /// The step again, ready for another attempt
    pub fn into_pending(self) -> PendingStep {
        PendingStep {
            step: self.step,
            error_context: self.error_context,
        }
    }
}
