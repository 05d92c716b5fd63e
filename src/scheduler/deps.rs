use crate::error::{Result, SbsError};
use crate::mail;
use crate::scheduler::job::{JobState, BECAUSE_OF_KEY};
use crate::store::{unix_now, JobId, JobStore};

/// Outcome of evaluating one job's predecessors.
enum DepVerdict {
    /// Every predecessor succeeded (or was cleaned up after succeeding).
    Ready,
    /// Some predecessor has not reached a terminal state yet.
    Waiting,
    /// A predecessor failed or was cancelled; the job must be cancelled.
    Blocked { by: JobId, state: JobState },
}

/// Advance held jobs whose dependencies have resolved.
///
/// Scans every job in `HOLD` in ascending id order: promotes to `QUEUED`
/// when all `afterok` predecessors succeeded, cancels (recording
/// `because_of_jobid`) when any predecessor errored or was cancelled.
/// Cancellation cascades across ticks: a grandchild of a failed job sees
/// its own parent's `CANCEL` on the next pass.
///
/// Returns the number of jobs whose state changed.
pub fn resolve(store: &JobStore) -> Result<usize> {
    let mut changed = 0;
    for id in store.list_ids()? {
        if store.read_status(id)? != JobState::Hold {
            continue;
        }
        match evaluate(store, id)? {
            DepVerdict::Waiting => {}
            DepVerdict::Ready => {
                store.append_status(id, JobState::Queued, unix_now())?;
                tracing::debug!(job_id = id, "Dependencies satisfied, queued");
                changed += 1;
            }
            DepVerdict::Blocked { by, state } => {
                store.append_status(id, JobState::Cancel, unix_now())?;
                store.write_setting(id, BECAUSE_OF_KEY, &by.to_string())?;
                tracing::info!(
                    job_id = id,
                    because_of = by,
                    dep_state = %state,
                    "Cancelled by dependency"
                );
                mail::notify_dep_cancel(store, id, by);
                changed += 1;
            }
        }
    }
    Ok(changed)
}

fn evaluate(store: &JobStore, id: JobId) -> Result<DepVerdict> {
    let mut first_error = None;
    let mut first_cancel = None;
    let mut pending = false;

    for dep in store.read_settings(id)?.afterok()? {
        match store.read_status(dep) {
            // A missing predecessor was cleaned up, which requires it to
            // have finished; treat it as satisfied.
            Err(SbsError::JobNotFound(_)) => {}
            Err(e) => return Err(e),
            Ok(JobState::Success) => {}
            Ok(JobState::Error) => {
                first_error.get_or_insert(dep);
            }
            Ok(JobState::Cancel) => {
                first_cancel.get_or_insert(dep);
            }
            Ok(_) => pending = true,
        }
    }

    // ERROR outranks CANCEL when recording the blocker.
    if let Some(by) = first_error {
        return Ok(DepVerdict::Blocked {
            by,
            state: JobState::Error,
        });
    }
    if let Some(by) = first_cancel {
        return Ok(DepVerdict::Blocked {
            by,
            state: JobState::Cancel,
        });
    }
    if pending {
        return Ok(DepVerdict::Waiting);
    }
    Ok(DepVerdict::Ready)
}
