use std::path::PathBuf;
use std::time::Duration;

/// Default directory name when `SBSHOME` is not set.
const DEFAULT_STORE_DIR: &str = ".sbs";

/// Resolve the store root: `$SBSHOME` if set, else `./.sbs`.
pub fn store_root() -> PathBuf {
    match std::env::var_os("SBSHOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home),
        _ => PathBuf::from(DEFAULT_STORE_DIR),
    }
}

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// CPU budget; admitted jobs' declared `procs` never exceed this in sum.
    pub max_procs: u32,
    /// Memory budget in MB; -1 means unlimited (memory is not checked).
    pub max_mem_mb: i64,
    /// Keep running even when no non-terminal jobs remain.
    pub forever: bool,
    /// Sleep between ticks when nothing changed.
    pub poll_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_procs: host_cpu_count(),
            max_mem_mb: -1,
            forever: false,
            poll_interval: Duration::from_secs(10),
        }
    }
}

impl RunnerConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

fn host_cpu_count() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}
