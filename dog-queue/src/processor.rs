use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::{Job, JobError};

/// In-process job handler. The returned value becomes the job's return value.
pub type ProcessFn = Arc<dyn Fn(Job) -> BoxFuture<'static, Result<Value, JobError>> + Send + Sync>;

/// What a worker runs for each job.
#[derive(Clone)]
pub enum Processor {
    Inline(ProcessFn),
    /// An executable run once per job: the job is written to its stdin as
    /// JSON, stdout is the return value, a non-zero exit fails the job.
    Sandboxed(PathBuf),
}

impl Processor {
    pub fn inline<F, Fut>(f: F) -> Self
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, JobError>> + Send + 'static,
    {
        Processor::Inline(Arc::new(move |job| f(job).boxed()))
    }

    pub fn sandboxed(path: impl Into<PathBuf>) -> Self {
        Processor::Sandboxed(path.into())
    }
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Processor::Inline(_) => f.write_str("Processor::Inline"),
            Processor::Sandboxed(path) => write!(f, "Processor::Sandboxed({})", path.display()),
        }
    }
}
