//! The store-mutating verbs behind the CLI, plus the read-only `status`.
//!
//! These run in their own short-lived processes while a runner may be
//! active; everything they write is either a single atomic status append or
//! serialized through the default lock, and the dispatcher observes the
//! effects on its next tick.

pub mod submit;

use serde::Serialize;

use crate::error::{Result, SbsError};
use crate::scheduler::job::JobState;
use crate::store::{unix_now, JobId, JobStore};

pub use submit::{submit, ScriptSource, SubmitOptions};

/// Put jobs on user hold. Legal from `HOLD` or `QUEUED`; a job already in
/// `USERHOLD` is left as is.
pub fn hold(store: &JobStore, ids: &[JobId]) -> Result<()> {
    for &id in ids {
        match store.read_status(id)? {
            JobState::UserHold => {}
            JobState::Hold | JobState::Queued => {
                store.append_status(id, JobState::UserHold, unix_now())?;
                tracing::info!(job_id = id, "Job held");
            }
            state => {
                return Err(SbsError::InvalidState {
                    id,
                    state,
                    verb: "hold",
                })
            }
        }
    }
    Ok(())
}

/// Release user-held jobs back to `HOLD`; the dependency resolver decides
/// whether they become runnable.
pub fn release(store: &JobStore, ids: &[JobId]) -> Result<()> {
    for &id in ids {
        match store.read_status(id)? {
            JobState::Hold => {}
            JobState::UserHold => {
                store.append_status(id, JobState::Hold, unix_now())?;
                tracing::info!(job_id = id, "Job released");
            }
            state => {
                return Err(SbsError::InvalidState {
                    id,
                    state,
                    verb: "release",
                })
            }
        }
    }
    Ok(())
}

/// Cancel jobs. A running job's child is killed outright; the supervisor
/// sees the `CANCEL` already recorded and leaves it as the terminal state.
pub fn cancel(store: &JobStore, ids: &[JobId]) -> Result<()> {
    for &id in ids {
        cancel_one(store, id)?;
    }
    Ok(())
}

pub fn cancel_one(store: &JobStore, id: JobId) -> Result<()> {
    let state = store.read_status(id)?;
    if state.is_terminal() {
        return Err(SbsError::InvalidState {
            id,
            state,
            verb: "cancel",
        });
    }
    // Record the cancel before killing so the supervisor never mistakes the
    // death for an ordinary failure.
    store.append_status(id, JobState::Cancel, unix_now())?;
    if state == JobState::Running {
        if let Some(pid) = store.read_pid(id)? {
            kill_hard(pid);
            tracing::info!(job_id = id, pid, "Killed running job");
        }
    } else {
        tracing::info!(job_id = id, "Job cancelled");
    }
    Ok(())
}

/// SIGKILL; cancellation is not negotiable.
fn kill_hard(pid: i32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGKILL) {
        tracing::warn!(pid, error = %e, "Failed to kill child");
    }
}

/// Signal-0 probe: does the process still exist?
pub fn pid_alive(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid), None).is_ok()
}

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub cleaned: Vec<JobId>,
    /// Terminal jobs kept because a non-terminal job still lists them in
    /// `afterok`, with the dependent that pinned them.
    pub kept: Vec<(JobId, JobId)>,
}

/// Delete terminal jobs that no non-terminal job depends on. Holds the
/// default lock for the whole pass so the referenced-set stays consistent
/// against concurrent submits.
pub fn cleanup(store: &JobStore, only: Option<JobId>) -> Result<CleanupReport> {
    if let Some(id) = only {
        if !store.job_exists(id) {
            return Err(SbsError::JobNotFound(id));
        }
    }

    let _guard = store.lock()?;
    let ids = store.list_ids()?;

    let mut referenced: Vec<(JobId, JobId)> = Vec::new();
    for &id in &ids {
        if !store.read_status(id)?.is_terminal() {
            for dep in store.read_settings(id)?.afterok()? {
                referenced.push((dep, id));
            }
        }
    }

    let mut report = CleanupReport::default();
    for &id in &ids {
        if only.is_some_and(|target| target != id) {
            continue;
        }
        if !store.read_status(id)?.is_terminal() {
            continue;
        }
        if let Some(&(_, holder)) = referenced.iter().find(|(dep, _)| *dep == id) {
            tracing::info!(job_id = id, dependent = holder, "Kept, still referenced");
            report.kept.push((id, holder));
        } else {
            store.delete_job(id)?;
            tracing::info!(job_id = id, "Cleaned up");
            report.cleaned.push(id);
        }
    }
    Ok(report)
}

/// Ask the active runner to stop on its next tick. With `kill`, it cancels
/// every running job first.
pub fn shutdown(store: &JobStore, kill: bool) -> Result<()> {
    store.request_shutdown(kill)
}

/// One row of the visible job table.
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub name: String,
    pub state: JobState,
    /// Unix seconds of the last status transition.
    pub since: i64,
    pub procs: u32,
    pub mem_mb: i64,
    pub afterok: Vec<JobId>,
    /// Predecessor whose failure cancelled this job, if any.
    pub because_of: Option<JobId>,
    pub pid: Option<i32>,
    pub return_code: Option<i32>,
}

/// Read-only view of one job or the whole store.
pub fn status(store: &JobStore, only: Option<JobId>) -> Result<Vec<JobSummary>> {
    let ids = match only {
        Some(id) => {
            if !store.job_exists(id) {
                return Err(SbsError::JobNotFound(id));
            }
            vec![id]
        }
        None => store.list_ids()?,
    };
    ids.into_iter().map(|id| summarize(store, id)).collect()
}

fn summarize(store: &JobStore, id: JobId) -> Result<JobSummary> {
    let history = store.read_history(id)?;
    let &(state, since) = history
        .last()
        .ok_or_else(|| SbsError::CorruptRecord(id, "empty state file".into()))?;
    let settings = store.read_settings(id)?;
    Ok(JobSummary {
        id,
        name: settings.name().unwrap_or_default(),
        state,
        since,
        procs: settings.procs()?,
        mem_mb: settings.mem_mb()?,
        afterok: settings.afterok()?,
        because_of: settings.because_of(),
        pid: store.read_pid(id)?,
        return_code: store.read_return_code(id)?,
    })
}

/// Fixed-width table for the terminal.
pub fn render_table(jobs: &[JobSummary]) -> String {
    let mut out = format!(
        "{:<6} {:<16} {:<2} {:<19} {:>5} {:>7} {:<12} {:>4}\n",
        "ID", "NAME", "ST", "SINCE", "PROCS", "MEM", "DEPS", "RC"
    );
    for job in jobs {
        let since = chrono::DateTime::from_timestamp(job.since, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| job.since.to_string());
        let deps = if job.afterok.is_empty() {
            "-".to_string()
        } else {
            job.afterok
                .iter()
                .map(|dep| dep.to_string())
                .collect::<Vec<_>>()
                .join(":")
        };
        let rc = job
            .return_code
            .map(|rc| rc.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<6} {:<16} {:<2} {:<19} {:>5} {:>7} {:<12} {:>4}\n",
            job.id,
            job.name,
            job.state.code(),
            since,
            job.procs,
            job.mem_mb,
            deps,
            rc
        ));
    }
    out
}
