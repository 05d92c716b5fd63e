use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SbsError};
use crate::store::JobId;

/// The states a job moves through. `Success`, `Error` and `Cancel` are
/// terminal: once one is appended to the history, no further transition is
/// legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    UserHold,
    Hold,
    Queued,
    Running,
    Success,
    Error,
    Cancel,
}

impl JobState {
    /// One-letter code used in the state file and the status table.
    pub fn code(&self) -> char {
        match self {
            JobState::UserHold => 'U',
            JobState::Hold => 'H',
            JobState::Queued => 'Q',
            JobState::Running => 'R',
            JobState::Success => 'S',
            JobState::Error => 'E',
            JobState::Cancel => 'C',
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Success | JobState::Error | JobState::Cancel)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::UserHold => write!(f, "USERHOLD"),
            JobState::Hold => write!(f, "HOLD"),
            JobState::Queued => write!(f, "QUEUED"),
            JobState::Running => write!(f, "RUNNING"),
            JobState::Success => write!(f, "SUCCESS"),
            JobState::Error => write!(f, "ERROR"),
            JobState::Cancel => write!(f, "CANCEL"),
        }
    }
}

impl FromStr for JobState {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "U" => Ok(JobState::UserHold),
            "H" => Ok(JobState::Hold),
            "Q" => Ok(JobState::Queued),
            "R" => Ok(JobState::Running),
            "S" => Ok(JobState::Success),
            "E" => Ok(JobState::Error),
            "C" => Ok(JobState::Cancel),
            _ => Err(()),
        }
    }
}

/// Setting keys a job record recognizes. Anything else in a `#SBS`
/// directive is dropped at submit time.
pub const KNOWN_SETTINGS: &[&str] = &[
    "name", "mem", "mail", "procs", "afterok", "stdout", "stderr", "wd",
];

/// Written when a dependency cascade cancels a job, naming the predecessor
/// whose failure caused it.
pub const BECAUSE_OF_KEY: &str = "because_of_jobid";

/// Per-job settings, persisted as `key\tvalue` lines. Raw strings in, typed
/// values out through the accessors below.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    map: BTreeMap<String, String>,
}

impl Settings {
    pub fn from_map(map: BTreeMap<String, String>) -> Self {
        Self { map }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Declared CPU slots. Absent defaults to 1; an explicit 0 is coerced
    /// to 1.
    pub fn procs(&self) -> Result<u32> {
        match self.get("procs") {
            None => Ok(1),
            Some(raw) => {
                let n: u32 = raw.trim().parse().map_err(|_| SbsError::BadSetting {
                    key: "procs",
                    value: raw.to_string(),
                })?;
                Ok(n.max(1))
            }
        }
    }

    /// Declared memory in MB. `M` or no suffix is megabytes, `G` is
    /// gigabytes at 1000 MB each. Absent means no declared memory (0).
    pub fn mem_mb(&self) -> Result<i64> {
        match self.get("mem") {
            None => Ok(0),
            Some(raw) => parse_mem_mb(raw).ok_or_else(|| SbsError::BadSetting {
                key: "mem",
                value: raw.to_string(),
            }),
        }
    }

    /// Predecessor job ids from the colon-separated `afterok` list.
    pub fn afterok(&self) -> Result<Vec<JobId>> {
        match self.get("afterok") {
            None => Ok(Vec::new()),
            Some(raw) => parse_afterok(raw),
        }
    }

    pub fn name(&self) -> Option<String> {
        self.get("name").map(sanitize_name)
    }

    pub fn mail(&self) -> Option<&str> {
        self.get("mail")
    }

    pub fn stdout_path(&self) -> Option<&str> {
        self.get("stdout")
    }

    pub fn stderr_path(&self) -> Option<&str> {
        self.get("stderr")
    }

    pub fn workdir(&self) -> Option<&str> {
        self.get("wd")
    }

    pub fn because_of(&self) -> Option<JobId> {
        self.get(BECAUSE_OF_KEY).and_then(|raw| raw.parse().ok())
    }
}

/// Parse a memory declaration: `500` or `500M` → 500 MB, `2G` → 2000 MB.
pub fn parse_mem_mb(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    let (digits, factor) = match raw.chars().last()? {
        'M' | 'm' => (&raw[..raw.len() - 1], 1),
        'G' | 'g' => (&raw[..raw.len() - 1], 1000),
        _ => (raw, 1),
    };
    let n: i64 = digits.parse().ok()?;
    (n >= 0).then_some(n * factor)
}

/// Parse a colon-separated dependency list like `3:7:12`.
pub fn parse_afterok(raw: &str) -> Result<Vec<JobId>> {
    raw.split(':')
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.trim().parse().map_err(|_| SbsError::BadSetting {
                key: "afterok",
                value: raw.to_string(),
            })
        })
        .collect()
}

/// Job names are restricted to `[A-Za-z0-9_.-]`; anything else becomes `_`.
pub fn sanitize_name(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
