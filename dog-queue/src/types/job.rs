use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::JobId;

/// A unit of work as seen by processors and listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Job name; hooks can filter on it.
    pub name: String,
    /// Queue the job was added to.
    pub queue: String,
    pub data: Value,
    /// Attempts started so far, including the current one.
    pub attempts_made: u32,
    pub timestamp: DateTime<Utc>,
}

impl Job {
    pub fn new(queue: impl Into<String>, name: impl Into<String>, data: Value, opts: &JobOptions) -> Self {
        Self {
            id: opts.job_id.clone().unwrap_or_default(),
            name: name.into(),
            queue: queue.into(),
            data,
            attempts_made: 0,
            timestamp: Utc::now(),
        }
    }
}

/// Per-job options given to `add`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Use this id instead of a generated one.
    pub job_id: Option<JobId>,
}

impl JobOptions {
    pub fn with_id(id: impl Into<JobId>) -> Self {
        Self { job_id: Some(id.into()) }
    }
}
