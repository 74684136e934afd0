//! Out-of-process processors.
//!
//! The script gets the job as one JSON document on stdin. Whatever it
//! prints on stdout is the return value (JSON when it parses, a string
//! otherwise, `null` when empty). A non-zero exit fails the job with the
//! script's stderr.

use std::path::Path;
use std::process::Stdio;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::{Job, JobError};

pub(crate) async fn run(path: &Path, job: &Job) -> Result<Value, JobError> {
    let payload = serde_json::to_vec(job).map_err(|e| JobError::permanent(format!("cannot encode job: {e}")))?;

    let mut child = Command::new(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| JobError::permanent(format!("cannot spawn {}: {e}", path.display())))?;

    // stdin is fed while stdout is drained, or a script echoing a large job
    // blocks on a full pipe
    let stdin = child.stdin.take();
    let feed = async move {
        match stdin {
            Some(mut stdin) => {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await
            }
            None => Ok(()),
        }
    };
    let (fed, output) = tokio::join!(feed, child.wait_with_output());

    let output = output.map_err(|e| JobError::retryable(format!("{} did not finish: {e}", path.display())))?;
    match fed {
        // the script exited without reading all of its input
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
        Err(e) => {
            return Err(JobError::retryable(format!(
                "cannot write job to {}: {e}",
                path.display()
            )))
        }
        Ok(()) => {}
    }

    debug!(script = %path.display(), job_id = %job.id, status = ?output.status, "sandboxed processor exited");

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(JobError::retryable(format!(
            "{} exited with {}: {}",
            path.display(),
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stdout = stdout.trim();
    if stdout.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(stdout).unwrap_or_else(|_| Value::String(stdout.to_string())))
}
