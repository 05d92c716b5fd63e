use std::collections::HashMap;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::commands;
use crate::config::RunnerConfig;
use crate::error::{Result, SbsError};
use crate::scheduler::deps;
use crate::scheduler::job::JobState;
use crate::store::{unix_now, JobId, JobStore};
use crate::worker::supervisor;

/// Resources deducted for one admitted (or crash-resumed) job, remembered
/// so the reap step can release them even if the record disappears.
#[derive(Debug, Clone, Copy)]
struct Reservation {
    procs: u32,
    mem_mb: i64,
}

/// The runner: admits queued jobs up to the CPU/memory budgets, FIFO by id,
/// and supervises them to completion.
///
/// One dispatcher per store, enforced by `run.lock`. Each tick, strictly in
/// this order:
///
/// 1. Check for a shutdown request (signal or sentinel file)
/// 2. Reap: release resources of jobs that left `RUNNING`
/// 3. Exit if nothing non-terminal remains (unless `forever`)
/// 4. Resolve dependencies (promote / cascade-cancel held jobs)
/// 5. Admit queued jobs while the budgets allow, ascending by id
/// 6. Sleep if the tick changed nothing
///
/// Supervisors run as sibling tasks and talk to the dispatcher only through
/// the store, so resuming after a runner crash is the same code path as
/// steady state: the running set seeds the availability counters on startup.
pub struct Dispatcher {
    store: JobStore,
    config: RunnerConfig,
    avail_procs: i64,
    avail_mem: i64,
    reserved: HashMap<JobId, Reservation>,
    supervisors: JoinSet<()>,
}

impl Dispatcher {
    pub fn new(store: JobStore, config: RunnerConfig) -> Self {
        Self {
            avail_procs: config.max_procs as i64,
            avail_mem: config.max_mem_mb,
            store,
            config,
            reserved: HashMap::new(),
            supervisors: JoinSet::new(),
        }
    }

    /// Run until the queue drains (or forever), until a shutdown sentinel
    /// appears, or until `shutdown` is cancelled by a signal.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<()> {
        let _run_lock = self.store.run_lock()?;
        self.resume_running_set()?;

        tracing::info!(
            max_procs = self.config.max_procs,
            max_mem_mb = self.config.max_mem_mb,
            forever = self.config.forever,
            "Runner started"
        );

        loop {
            if shutdown.is_cancelled() {
                tracing::info!("Stopping on signal");
                break;
            }
            if let Some(kill) = self.store.take_shutdown_request()? {
                tracing::info!(kill, "Shutdown requested");
                if kill {
                    self.cancel_running()?;
                }
                break;
            }

            let reaped = self.reap()?;

            if !self.config.forever && self.all_terminal()? {
                tracing::info!("Queue drained");
                break;
            }

            let resolved = deps::resolve(&self.store)?;
            let admitted = self.admit()?;

            if reaped + resolved + admitted == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }

        self.drain().await;
        self.reap()?;
        Ok(())
    }

    /// Seed availability from running-set markers left by a previous runner.
    fn resume_running_set(&mut self) -> Result<()> {
        for id in self.store.running_ids()? {
            let settings = match self.store.read_settings(id) {
                Ok(s) => s,
                Err(SbsError::JobNotFound(_)) => {
                    tracing::warn!(job_id = id, "Stale running marker for missing job, clearing");
                    self.store.unmark_running(id)?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            let reservation = Reservation {
                procs: settings.procs()?,
                mem_mb: settings.mem_mb()?,
            };
            self.reserve(id, reservation);
            tracing::info!(job_id = id, "Resumed accounting for running job");
        }
        Ok(())
    }

    /// Release the resources of every running-set entry whose job is no
    /// longer in `RUNNING`. Returns how many were reaped.
    fn reap(&mut self) -> Result<usize> {
        // Clear finished supervisor tasks as a side effect; their results
        // are already in the store.
        while self.supervisors.try_join_next().is_some() {}

        let mut reaped = 0;
        for id in self.store.running_ids()? {
            let still_running = match self.store.read_status(id) {
                Ok(state) => state == JobState::Running,
                Err(SbsError::JobNotFound(_)) => false,
                Err(e) => return Err(e),
            };
            if still_running {
                continue;
            }
            self.release(id);
            self.store.unmark_running(id)?;
            reaped += 1;
        }
        Ok(reaped)
    }

    fn all_terminal(&self) -> Result<bool> {
        for id in self.store.list_ids()? {
            match self.store.read_status(id) {
                Ok(state) if !state.is_terminal() => return Ok(false),
                Ok(_) => {}
                // Deleted underneath us by a concurrent cleanup.
                Err(SbsError::JobNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// Admit queued jobs while one fits, ascending by id. Memory uses a
    /// strict less-than: a job whose declared memory exactly equals current
    /// availability is not admitted. Returns how many were admitted.
    fn admit(&mut self) -> Result<usize> {
        let mut admitted = 0;
        while self.avail_procs > 0 {
            let Some((id, reservation)) = self.select_next_runnable()? else {
                break;
            };
            self.reserve(id, reservation);
            self.store.append_status(id, JobState::Running, unix_now())?;
            self.store.mark_running(id)?;
            tracing::info!(
                job_id = id,
                procs = reservation.procs,
                mem_mb = reservation.mem_mb,
                "Job started"
            );
            let store = self.store.clone();
            self.supervisors.spawn(supervisor::supervise(store, id));
            admitted += 1;
        }
        Ok(admitted)
    }

    /// First `QUEUED` job by ascending id that fits the current budgets.
    fn select_next_runnable(&self) -> Result<Option<(JobId, Reservation)>> {
        for id in self.store.list_ids()? {
            match self.store.read_status(id) {
                Ok(JobState::Queued) => {}
                Ok(_) => continue,
                Err(SbsError::JobNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
            let settings = self.store.read_settings(id)?;
            let reservation = Reservation {
                procs: settings.procs()?,
                mem_mb: settings.mem_mb()?,
            };
            if reservation.procs as i64 > self.avail_procs {
                continue;
            }
            if self.avail_mem >= 0 && reservation.mem_mb >= self.avail_mem {
                continue;
            }
            return Ok(Some((id, reservation)));
        }
        Ok(None)
    }

    fn reserve(&mut self, id: JobId, reservation: Reservation) {
        self.avail_procs -= reservation.procs as i64;
        if self.config.max_mem_mb >= 0 {
            self.avail_mem -= reservation.mem_mb;
        }
        self.reserved.insert(id, reservation);
    }

    fn release(&mut self, id: JobId) {
        if let Some(reservation) = self.reserved.remove(&id) {
            self.avail_procs += reservation.procs as i64;
            if self.config.max_mem_mb >= 0 {
                self.avail_mem += reservation.mem_mb;
            }
        }
    }

    /// Hard shutdown: cancel (and kill) everything in the running set.
    fn cancel_running(&self) -> Result<()> {
        for id in self.store.running_ids()? {
            match commands::cancel_one(&self.store, id) {
                Ok(()) => {}
                // Lost the race against the supervisor's terminal write.
                Err(SbsError::InvalidState { .. }) | Err(SbsError::JobNotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Wait for in-flight supervisors so their children are reaped and
    /// their records completed before the runner exits.
    async fn drain(&mut self) {
        if !self.supervisors.is_empty() {
            tracing::info!(inflight = self.supervisors.len(), "Draining supervisors");
        }
        while self.supervisors.join_next().await.is_some() {}
    }
}
