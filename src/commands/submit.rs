use std::path::PathBuf;

use crate::error::{Result, SbsError};
use crate::scheduler::job::{JobState, Settings, KNOWN_SETTINGS};
use crate::store::{JobId, JobStore};

const DIRECTIVE_PREFIX: &str = "#SBS -";

/// Where the script text comes from.
#[derive(Debug, Clone)]
pub enum ScriptSource {
    /// Read the script from a file.
    File(PathBuf),
    /// An inline command, wrapped into a one-line script.
    Inline(String),
}

/// Command-line overrides. Any field set here wins over the corresponding
/// `#SBS` directive in the script.
#[derive(Debug, Default, Clone)]
pub struct SubmitOptions {
    pub name: Option<String>,
    pub mem: Option<String>,
    pub mail: Option<String>,
    pub procs: Option<u32>,
    pub afterok: Option<String>,
    pub hold: bool,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub wd: Option<String>,
}

/// Submit a job: parse directives, apply overrides, validate, persist.
/// Returns the new job id.
pub fn submit(store: &JobStore, source: &ScriptSource, opts: &SubmitOptions) -> Result<JobId> {
    let text = match source {
        ScriptSource::File(path) => match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SbsError::ScriptMissing(path.clone()))
            }
            Err(e) => return Err(e.into()),
        },
        ScriptSource::Inline(command) => format!("{command}\n"),
    };

    let (mut settings, directive_hold) = parse_directives(&text);
    apply_overrides(&mut settings, opts);

    // Typed accessors double as validation.
    settings.procs()?;
    settings.mem_mb()?;
    for dep in settings.afterok()? {
        if !store.job_exists(dep) {
            return Err(SbsError::DependencyMissing(dep));
        }
    }
    if let Some(name) = settings.name() {
        settings.set("name", name);
    }

    let initial_state = if opts.hold || directive_hold {
        JobState::UserHold
    } else {
        JobState::Hold
    };

    let id = store.create_job(&with_shebang(&text), &settings, initial_state)?;
    tracing::info!(job_id = id, state = %initial_state, "Job submitted");
    Ok(id)
}

/// Collect `#SBS -<key> <value>` directives. The whole script is scanned,
/// not only the prologue, so a directive inside a here-doc is picked up
/// too; that matches the behavior users rely on.
fn parse_directives(text: &str) -> (Settings, bool) {
    let mut settings = Settings::default();
    let mut hold = false;
    for line in text.lines() {
        let Some(rest) = line.strip_prefix(DIRECTIVE_PREFIX) else {
            continue;
        };
        let mut parts = rest.splitn(2, char::is_whitespace);
        let key = parts.next().unwrap_or_default();
        let value = parts.next().unwrap_or("").trim();
        if key == "hold" {
            hold = true;
        } else if KNOWN_SETTINGS.contains(&key) {
            settings.set(key, value);
        } else {
            tracing::warn!(key, "Ignoring unknown #SBS directive");
        }
    }
    (settings, hold)
}

fn apply_overrides(settings: &mut Settings, opts: &SubmitOptions) {
    if let Some(name) = &opts.name {
        settings.set("name", name.clone());
    }
    if let Some(mem) = &opts.mem {
        settings.set("mem", mem.clone());
    }
    if let Some(mail) = &opts.mail {
        settings.set("mail", mail.clone());
    }
    if let Some(procs) = opts.procs {
        settings.set("procs", procs.to_string());
    }
    if let Some(afterok) = &opts.afterok {
        settings.set("afterok", afterok.clone());
    }
    if let Some(stdout) = &opts.stdout {
        settings.set("stdout", stdout.clone());
    }
    if let Some(stderr) = &opts.stderr {
        settings.set("stderr", stderr.clone());
    }
    if let Some(wd) = &opts.wd {
        settings.set("wd", wd.clone());
    }
}

/// Scripts are executed directly, so they need an interpreter line; inject
/// `#!/bin/sh` when the first line is not already a shebang.
fn with_shebang(text: &str) -> String {
    if text.starts_with("#!") {
        text.to_string()
    } else {
        format!("#!/bin/sh\n{text}")
    }
}
