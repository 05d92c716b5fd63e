//! Per-job child process supervision.
//!
//! One supervisor task per running job:
//!
//! 1. Resolves stdout/stderr capture targets and the working directory
//! 2. Spawns the job's script file with `JOB_ID` in the environment
//! 3. Persists the child pid, then blocks on the child
//! 4. Records the exit code and the terminal state
//!
//! Supervisors never touch dispatcher memory; everything they report goes
//! through the store, which is what makes a crashed runner resumable.
//!
//! # Security Note
//!
//! Scripts run directly as the invoking user without sandboxing. sbs is a
//! single-user tool; the script is trusted by definition.

pub mod supervisor;

pub use supervisor::supervise;
