/// Execution and recovery strategies of the tree loader
use crate::config::{CrawlConfig, ExecutionMode, RecoveryMode};
use crate::error::FederationError;
use crate::loader::step::{PendingStep, StepExecutionError};

/// How many steps may run at once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// One step at a time, most recently scheduled first (depth-first)
    #[default]
    Sequential,
    /// Bounded fan-out
    Concurrent { max_in_flight: usize },
}

impl ExecutionStrategy {
    pub fn from_config(config: &CrawlConfig) -> Self {
        match config.execution {
            ExecutionMode::Sequential => ExecutionStrategy::Sequential,
            ExecutionMode::Concurrent => ExecutionStrategy::Concurrent {
                max_in_flight: config.max_concurrency,
            },
        }
    }

    pub fn max_in_flight(&self) -> usize {
        match self {
            ExecutionStrategy::Sequential => 1,
            ExecutionStrategy::Concurrent { max_in_flight } => (*max_in_flight).max(1),
        }
    }
}

/// What the driver does with a failed step
#[derive(Debug)]
pub enum RecoveryAction {
    /// Schedule again right away
    Retry(PendingStep),
    /// Replay after the main queue drains
    Defer(PendingStep),
    /// Give up on the step and its subtree
    Drop { name: String, error: FederationError },
}

/// Policy for failed steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRecoveryStrategy {
    Drop,
    RetryImmediately { max_attempts: u32 },
    Deferred { max_attempts: u32 },
}

impl StepRecoveryStrategy {
    pub fn from_config(config: &CrawlConfig) -> Self {
        match config.recovery {
            RecoveryMode::Drop => StepRecoveryStrategy::Drop,
            RecoveryMode::Retry => StepRecoveryStrategy::RetryImmediately {
                max_attempts: config.max_attempts,
            },
            RecoveryMode::Deferred => StepRecoveryStrategy::Deferred {
                max_attempts: config.max_attempts,
            },
        }
    }

    /// Decide the fate of a failed step
    ///
    /// `max_attempts` counts every attempt including the first one.
    pub fn handle(&self, failure: StepExecutionError) -> RecoveryAction {
        let attempts = failure.error_context.failures();

        match *self {
            StepRecoveryStrategy::RetryImmediately { max_attempts } if attempts < max_attempts => {
                RecoveryAction::Retry(failure.into_pending())
            }
            StepRecoveryStrategy::Deferred { max_attempts } if attempts < max_attempts => {
                RecoveryAction::Defer(failure.into_pending())
            }
            _ => RecoveryAction::Drop {
                name: failure.name,
                error: failure.error,
            },
        }
    }
}

impl Default for StepRecoveryStrategy {
    fn default() -> Self {
        StepRecoveryStrategy::RetryImmediately { max_attempts: 3 }
    }
}
