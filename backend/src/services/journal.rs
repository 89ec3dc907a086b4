//! Progress tracking for multi-step purchase mutations
//!
//! The store offers no transaction spanning item replacement, ledger writes
//! and projection updates. A [`MutationJournal`] remembers which write steps
//! have landed so that a later failure is reported as a partial failure with
//! enough context for manual reconciliation.

use std::future::Future;

use uuid::Uuid;

use crate::error::{AppError, AppResult};

pub struct MutationJournal {
    operation: &'static str,
    entity_id: Uuid,
    completed: Vec<&'static str>,
}

impl MutationJournal {
    pub fn new(operation: &'static str, entity_id: Uuid) -> Self {
        Self {
            operation,
            entity_id,
            completed: Vec::new(),
        }
    }

    /// Run one write step and record it on success
    pub async fn step<T, F>(&mut self, name: &'static str, fut: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        match fut.await {
            Ok(value) => {
                self.completed.push(name);
                Ok(value)
            }
            Err(err) => Err(self.fail(name, err)),
        }
    }

    /// Classify an error raised at `step`
    ///
    /// Before any write the error passes through untouched. Afterwards, or
    /// when a nested step already failed part-way, it becomes
    /// [`AppError::PartialFailure`] for this operation, keeping the innermost
    /// failed step.
    pub fn fail(&self, step: &'static str, err: AppError) -> AppError {
        let nested_partial = matches!(err, AppError::PartialFailure { .. });
        if self.completed.is_empty() && !nested_partial {
            return err;
        }

        let (failed_step, reason) = match err {
            AppError::PartialFailure {
                failed_step,
                reason,
                ..
            } => (failed_step, reason),
            other => (step, other.to_string()),
        };

        tracing::error!(
            operation = self.operation,
            entity_id = %self.entity_id,
            failed_step,
            completed_steps = ?self.completed,
            reason = %reason,
            "mutation stopped part-way; manual reconciliation required"
        );

        AppError::PartialFailure {
            operation: self.operation,
            entity_id: self.entity_id,
            failed_step,
            completed_steps: self.completed.clone(),
            reason,
        }
    }
}
