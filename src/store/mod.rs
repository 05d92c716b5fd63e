//! Filesystem persistence for the job queue.
//!
//! Everything sbs knows lives under one store root:
//!
//! ```text
//! <root>/
//!   next_job_id       next id to hand out, one line
//!   lock/             default lock (id allocation, cleanup)
//!   run.lock/         held by the active runner
//!   running/sbs.<id>  marker per currently supervised job
//!   shutdown          sentinel the runner consumes on its next tick
//!   sbs.<id>/         one directory per job
//!     script          executable, mode 0700
//!     settings        key\tvalue lines, later lines win
//!     state           append-only STATE\tunix_secs lines
//!     pid             child pid while running
//!     returncode      exit status after the child finished
//!     stdout, stderr  captured streams unless redirected
//! ```
//!
//! Status appends are single short `O_APPEND` writes, so concurrent writers
//! (dispatcher, supervisors, external commands) interleave whole lines and
//! readers always see a complete last record. Writers that genuinely race
//! (id allocation, cleanup deletes) serialize through [`DirLock`].

pub mod lock;

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::{Result, SbsError};
use crate::scheduler::job::{JobState, Settings};
pub use lock::DirLock;

pub type JobId = u64;

const NEXT_ID_FILE: &str = "next_job_id";
const RUNNING_DIR: &str = "running";
const SHUTDOWN_FILE: &str = "shutdown";
const DEFAULT_LOCK: &str = "lock";
const RUN_LOCK: &str = "run.lock";
const JOB_DIR_PREFIX: &str = "sbs.";

/// Current wall clock as unix seconds, the timestamp unit of the state file.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Handle to a store root. Cheap to clone; all state is on disk.
#[derive(Debug, Clone)]
pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    /// Open the store at `root`, creating the layout on first use.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(RUNNING_DIR))?;
        let counter = root.join(NEXT_ID_FILE);
        if !counter.exists() {
            fs::write(&counter, "1\n")?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Acquire the default lock.
    pub fn lock(&self) -> Result<DirLock> {
        DirLock::acquire(&self.root, DEFAULT_LOCK)
    }

    /// Acquire the runner lock. At most one dispatcher per store.
    pub fn run_lock(&self) -> Result<DirLock> {
        DirLock::acquire(&self.root, RUN_LOCK)
    }

    pub fn job_dir(&self, id: JobId) -> PathBuf {
        self.root.join(format!("{JOB_DIR_PREFIX}{id}"))
    }

    pub fn script_path(&self, id: JobId) -> PathBuf {
        self.job_dir(id).join("script")
    }

    pub fn job_exists(&self, id: JobId) -> bool {
        self.job_dir(id).is_dir()
    }

    /// Allocate an id and persist a new job record. The initial status entry
    /// is stamped with the current time.
    pub fn create_job(
        &self,
        script: &str,
        settings: &Settings,
        initial_state: JobState,
    ) -> Result<JobId> {
        let _guard = self.lock()?;
        let id = self.allocate_id()?;

        let dir = self.job_dir(id);
        fs::create_dir(&dir)?;

        let script_path = dir.join("script");
        fs::write(&script_path, script)?;
        fs::set_permissions(&script_path, fs::Permissions::from_mode(0o700))?;

        let mut body = String::new();
        for (key, value) in settings.iter() {
            body.push_str(key);
            body.push('\t');
            body.push_str(value);
            body.push('\n');
        }
        fs::write(dir.join("settings"), body)?;

        self.append_status(id, initial_state, unix_now())?;
        Ok(id)
    }

    fn allocate_id(&self) -> Result<JobId> {
        let counter = self.root.join(NEXT_ID_FILE);
        let raw = fs::read_to_string(&counter)?;
        let id: JobId = raw
            .trim()
            .parse()
            .map_err(|_| SbsError::CorruptRecord(0, format!("bad next_job_id {raw:?}")))?;
        fs::write(&counter, format!("{}\n", id + 1))?;
        Ok(id)
    }

    /// Current state of a job: the last line of its state file.
    pub fn read_status(&self, id: JobId) -> Result<JobState> {
        self.read_history(id)?
            .last()
            .map(|(state, _)| *state)
            .ok_or_else(|| SbsError::CorruptRecord(id, "empty state file".into()))
    }

    /// Full status history, oldest first.
    pub fn read_history(&self, id: JobId) -> Result<Vec<(JobState, i64)>> {
        let raw = self.read_job_file(id, "state")?;
        let mut history = Vec::new();
        for line in raw.lines().filter(|l| !l.is_empty()) {
            let (state, ts) = line
                .split_once('\t')
                .ok_or_else(|| SbsError::CorruptRecord(id, format!("bad state line {line:?}")))?;
            let state: JobState = state
                .parse()
                .map_err(|_| SbsError::CorruptRecord(id, format!("unknown state {state:?}")))?;
            let ts: i64 = ts
                .parse()
                .map_err(|_| SbsError::CorruptRecord(id, format!("bad timestamp {ts:?}")))?;
            history.push((state, ts));
        }
        Ok(history)
    }

    /// Append one status entry. A single short write with `O_APPEND`
    /// semantics; concurrent appenders interleave whole lines.
    pub fn append_status(&self, id: JobId, state: JobState, timestamp: i64) -> Result<()> {
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.job_dir(id).join("state"))?;
        file.write_all(format!("{}\t{}\n", state.code(), timestamp).as_bytes())?;
        Ok(())
    }

    pub fn read_setting(&self, id: JobId, key: &str) -> Result<Option<String>> {
        Ok(self.read_settings(id)?.get(key).map(str::to_string))
    }

    /// The whole settings map. Later lines override earlier ones, which is
    /// how single-key updates are written.
    pub fn read_settings(&self, id: JobId) -> Result<Settings> {
        let raw = self.read_job_file(id, "settings")?;
        let mut map = BTreeMap::new();
        for line in raw.lines().filter(|l| !l.is_empty()) {
            if let Some((key, value)) = line.split_once('\t') {
                map.insert(key.to_string(), value.to_string());
            }
        }
        Ok(Settings::from_map(map))
    }

    /// Record one setting by appending a line; the last occurrence wins on
    /// read, so this never rewrites the file under a concurrent reader.
    pub fn write_setting(&self, id: JobId, key: &str, value: &str) -> Result<()> {
        if !self.job_exists(id) {
            return Err(SbsError::JobNotFound(id));
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.job_dir(id).join("settings"))?;
        file.write_all(format!("{key}\t{value}\n").as_bytes())?;
        Ok(())
    }

    pub fn read_script(&self, id: JobId) -> Result<String> {
        self.read_job_file(id, "script")
    }

    /// All job ids present in the store, ascending.
    pub fn list_ids(&self) -> Result<Vec<JobId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(id) = parse_job_dir_name(&entry.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn mark_running(&self, id: JobId) -> Result<()> {
        fs::write(self.running_marker(id), "")?;
        Ok(())
    }

    pub fn unmark_running(&self, id: JobId) -> Result<()> {
        match fs::remove_file(self.running_marker(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Ids in the running set, ascending.
    pub fn running_ids(&self) -> Result<Vec<JobId>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join(RUNNING_DIR))? {
            let entry = entry?;
            if let Some(id) = parse_job_dir_name(&entry.file_name().to_string_lossy()) {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }

    pub fn write_pid(&self, id: JobId, pid: u32) -> Result<()> {
        fs::write(self.job_dir(id).join("pid"), format!("{pid}\n"))?;
        Ok(())
    }

    pub fn read_pid(&self, id: JobId) -> Result<Option<i32>> {
        self.read_optional_int(id, "pid")
    }

    pub fn write_return_code(&self, id: JobId, rc: i32) -> Result<()> {
        fs::write(self.job_dir(id).join("returncode"), format!("{rc}\n"))?;
        Ok(())
    }

    pub fn read_return_code(&self, id: JobId) -> Result<Option<i32>> {
        self.read_optional_int(id, "returncode")
    }

    /// Remove a job record entirely. Callers serialize through the default
    /// lock; see [`crate::commands::cleanup`].
    pub fn delete_job(&self, id: JobId) -> Result<()> {
        if !self.job_exists(id) {
            return Err(SbsError::JobNotFound(id));
        }
        fs::remove_dir_all(self.job_dir(id))?;
        Ok(())
    }

    /// Write the shutdown sentinel for the runner to pick up.
    pub fn request_shutdown(&self, kill: bool) -> Result<()> {
        let body = if kill { "kill\n" } else { "" };
        fs::write(self.root.join(SHUTDOWN_FILE), body)?;
        Ok(())
    }

    /// Consume the shutdown sentinel if present. `Some(true)` means hard
    /// shutdown (kill running jobs).
    pub fn take_shutdown_request(&self) -> Result<Option<bool>> {
        let path = self.root.join(SHUTDOWN_FILE);
        match fs::read_to_string(&path) {
            Ok(body) => {
                fs::remove_file(&path)?;
                Ok(Some(body.trim() == "kill"))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn running_marker(&self, id: JobId) -> PathBuf {
        self.root.join(RUNNING_DIR).join(format!("{JOB_DIR_PREFIX}{id}"))
    }

    fn read_job_file(&self, id: JobId, name: &str) -> Result<String> {
        match fs::read_to_string(self.job_dir(id).join(name)) {
            Ok(raw) => Ok(raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SbsError::JobNotFound(id))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn read_optional_int(&self, id: JobId, name: &str) -> Result<Option<i32>> {
        match fs::read_to_string(self.job_dir(id).join(name)) {
            Ok(raw) => {
                let value = raw.trim().parse().map_err(|_| {
                    SbsError::CorruptRecord(id, format!("bad {name} {raw:?}"))
                })?;
                Ok(Some(value))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_job_dir_name(name: &str) -> Option<JobId> {
    name.strip_prefix(JOB_DIR_PREFIX)?.parse().ok()
}
