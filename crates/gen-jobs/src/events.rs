/// Job lifecycle events surfaced to the UI layer
///
/// The tracker pushes these over an unbounded channel; the consumer turns
/// them into toasts, badges or log lines. Dropping the receiver is fine;
/// sends are best-effort.
use serde::Serialize;

use crate::{GenDomain, JobKey, JobStatus};

#[derive(Debug, Clone, Serialize)]
pub enum JobEvent {
    /// A job entry was created (or re-created, superseding a prior one).
    Created { domain: GenDomain, key: JobKey },

    /// Poll results moved the job between non-terminal statuses.
    StatusChanged {
        domain: GenDomain,
        key: JobKey,
        status: JobStatus,
        progress: u8,
    },

    /// The job finished and was removed from the registry. `label` names
    /// the finished entity when the completion source provides one.
    Completed {
        domain: GenDomain,
        key: JobKey,
        label: Option<String>,
    },

    /// The backend reported failure, or the trigger call itself failed.
    Failed {
        domain: GenDomain,
        key: JobKey,
        message: String,
    },

    /// The client-side deadline elapsed without a terminal outcome.
    TimedOut { domain: GenDomain, key: JobKey },
}

impl JobEvent {
    pub fn key(&self) -> &JobKey {
        match self {
            JobEvent::Created { key, .. }
            | JobEvent::StatusChanged { key, .. }
            | JobEvent::Completed { key, .. }
            | JobEvent::Failed { key, .. }
            | JobEvent::TimedOut { key, .. } => key,
        }
    }

    pub fn domain(&self) -> GenDomain {
        match self {
            JobEvent::Created { domain, .. }
            | JobEvent::StatusChanged { domain, .. }
            | JobEvent::Completed { domain, .. }
            | JobEvent::Failed { domain, .. }
            | JobEvent::TimedOut { domain, .. } => *domain,
        }
    }

    /// Whether this event ends the job's lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::Completed { .. } | JobEvent::Failed { .. } | JobEvent::TimedOut { .. }
        )
    }
}
