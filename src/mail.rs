//! Best-effort notification through the local `mail` binary.
//!
//! Jobs opt in with the `mail` setting. Failures are logged at debug and
//! otherwise ignored; notification never affects job outcomes.

use std::io::Write;
use std::process::{Command, Stdio};

use crate::scheduler::job::JobState;
use crate::store::{JobId, JobStore};

/// Notify that a job reached a terminal state.
pub fn notify_finished(store: &JobStore, id: JobId, state: JobState, rc: i32) {
    let Some(addr) = address(store, id) else {
        return;
    };
    let name = display_name(store, id);
    let subject = format!("sbs job {id} ({name}): {state}");
    let body = format!("Job {id} ({name}) finished in state {state}, return code {rc}.\n");
    send(&addr, &subject, &body);
}

/// Notify that a job was cancelled because a predecessor failed.
pub fn notify_dep_cancel(store: &JobStore, id: JobId, because_of: JobId) {
    let Some(addr) = address(store, id) else {
        return;
    };
    let name = display_name(store, id);
    let subject = format!("sbs job {id} ({name}): CANCEL");
    let body = format!("Job {id} ({name}) was cancelled because job {because_of} did not succeed.\n");
    send(&addr, &subject, &body);
}

fn address(store: &JobStore, id: JobId) -> Option<String> {
    store
        .read_settings(id)
        .ok()?
        .mail()
        .map(str::to_string)
}

fn display_name(store: &JobStore, id: JobId) -> String {
    store
        .read_settings(id)
        .ok()
        .and_then(|s| s.name())
        .unwrap_or_else(|| format!("sbs.{id}"))
}

fn send(addr: &str, subject: &str, body: &str) {
    let spawned = Command::new("mail")
        .arg("-s")
        .arg(subject)
        .arg(addr)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn();

    match spawned {
        Ok(mut child) => {
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(body.as_bytes());
            }
            let _ = child.wait();
        }
        Err(e) => {
            tracing::debug!(error = %e, "Could not invoke mail");
        }
    }
}
