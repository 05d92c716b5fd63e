use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::Result;
use crate::mail;
use crate::scheduler::job::JobState;
use crate::store::{unix_now, JobId, JobStore};

/// Exit code recorded when the child could not be spawned or the wait was
/// interrupted.
const INTERRUPTED_RC: i32 = 127;

/// Supervise one job to completion. Spawned by the dispatcher as a sibling
/// task; never returns an error to the caller, failures are recorded in the
/// job record instead so the runner keeps serving other jobs.
pub async fn supervise(store: JobStore, id: JobId) {
    if let Err(e) = run_one(&store, id).await {
        tracing::error!(job_id = id, error = %e, "Supervisor failed");
        if let Err(e) = finish(&store, id, INTERRUPTED_RC) {
            tracing::error!(job_id = id, error = %e, "Could not record job failure");
        }
    }
}

async fn run_one(store: &JobStore, id: JobId) -> Result<()> {
    let settings = store.read_settings(id)?;
    let stdout = open_capture(store, id, settings.stdout_path(), "stdout")?;
    let stderr = open_capture(store, id, settings.stderr_path(), "stderr")?;

    let mut command = Command::new(store.script_path(id));
    command
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .env("JOB_ID", id.to_string());
    if let Some(wd) = settings.workdir() {
        command.current_dir(wd);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!(job_id = id, error = %e, "Failed to spawn job script");
            return finish(store, id, INTERRUPTED_RC);
        }
    };
    if let Some(pid) = child.id() {
        store.write_pid(id, pid)?;
    }
    tracing::debug!(job_id = id, pid = child.id(), "Child started");

    let rc = match child.wait().await {
        Ok(status) => exit_code(status),
        Err(e) => {
            tracing::warn!(job_id = id, error = %e, "Wait on child interrupted");
            INTERRUPTED_RC
        }
    };
    finish(store, id, rc)
}

/// Record the outcome: return code, then terminal state. A job already in
/// `CANCEL` (killed by an external cancel) keeps that state; terminal states
/// are absorbing.
fn finish(store: &JobStore, id: JobId, rc: i32) -> Result<()> {
    store.write_return_code(id, rc)?;
    let final_state = if store.read_status(id)? == JobState::Cancel {
        JobState::Cancel
    } else if rc == 0 {
        store.append_status(id, JobState::Success, unix_now())?;
        JobState::Success
    } else {
        store.append_status(id, JobState::Error, unix_now())?;
        JobState::Error
    };
    tracing::info!(job_id = id, rc, state = %final_state, "Job finished");
    mail::notify_finished(store, id, final_state, rc);
    Ok(())
}

/// Where a capture stream goes: the configured path, `<dir>/<id>.<stream>`
/// when the configured path is an existing directory, or the job directory
/// default.
fn open_capture(
    store: &JobStore,
    id: JobId,
    target: Option<&str>,
    stream: &str,
) -> Result<File> {
    let path = match target {
        None => store.job_dir(id).join(stream),
        Some(raw) => {
            let configured = PathBuf::from(raw);
            if configured.is_dir() {
                configured.join(format!("{id}.{stream}"))
            } else {
                configured
            }
        }
    };
    Ok(File::create(path)?)
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(INTERRUPTED_RC)
}
