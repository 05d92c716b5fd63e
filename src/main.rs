use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use sbs::commands::{self, ScriptSource, SubmitOptions};
use sbs::config::{self, RunnerConfig};
use sbs::error::{Result, SbsError};
use sbs::scheduler::job::parse_mem_mb;
use sbs::scheduler::Dispatcher;
use sbs::shutdown::install_shutdown_handler;
use sbs::store::JobStore;

#[derive(Parser, Debug)]
#[command(name = "sbs")]
#[command(about = "A single-host batch job scheduler backed by the filesystem")]
struct Cli {
    /// Store directory (default: $SBSHOME, else ./.sbs)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a script (or an inline command) to the queue
    Submit {
        /// Path to the job script
        script: Option<PathBuf>,

        /// Inline command instead of a script file
        #[arg(short = 'c', long, conflicts_with = "script")]
        command: Option<String>,

        /// Job name
        #[arg(long)]
        name: Option<String>,

        /// Declared memory, e.g. 500M or 2G
        #[arg(long)]
        mem: Option<String>,

        /// Mail address notified on completion
        #[arg(long)]
        mail: Option<String>,

        /// Declared CPU slots
        #[arg(long)]
        procs: Option<u32>,

        /// Colon-separated predecessor job ids, e.g. 3:7:12
        #[arg(long)]
        afterok: Option<String>,

        /// Submit on user hold
        #[arg(long)]
        hold: bool,

        /// Stdout target (file, or existing directory)
        #[arg(long)]
        stdout: Option<String>,

        /// Stderr target (file, or existing directory)
        #[arg(long)]
        stderr: Option<String>,

        /// Working directory for the job
        #[arg(long)]
        wd: Option<String>,
    },

    /// Show the job table
    Status {
        /// Restrict to one job
        id: Option<u64>,

        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Put jobs on user hold
    Hold {
        #[arg(required = true)]
        ids: Vec<u64>,
    },

    /// Release user-held jobs
    Release {
        #[arg(required = true)]
        ids: Vec<u64>,
    },

    /// Cancel jobs, killing them if running
    Cancel {
        #[arg(required = true)]
        ids: Vec<u64>,
    },

    /// Delete finished jobs nobody depends on anymore
    Cleanup {
        /// Restrict to one job
        id: Option<u64>,
    },

    /// Run queued jobs until the queue drains
    Run {
        /// CPU budget (default: host CPU count)
        #[arg(long)]
        max_procs: Option<u32>,

        /// Memory budget, e.g. 16G (default: unlimited)
        #[arg(long)]
        max_mem: Option<String>,

        /// Keep running when the queue is empty
        #[arg(long)]
        forever: bool,

        /// Seconds to sleep between idle ticks
        #[arg(long, default_value = "10")]
        poll_secs: u64,
    },

    /// Ask the active runner to stop on its next tick
    Shutdown {
        /// Kill running jobs instead of letting them finish
        #[arg(long)]
        kill: bool,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("sbs: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let root = cli.store.unwrap_or_else(config::store_root);
    let store = JobStore::open(root)?;

    match cli.command {
        Command::Submit {
            script,
            command,
            name,
            mem,
            mail,
            procs,
            afterok,
            hold,
            stdout,
            stderr,
            wd,
        } => {
            let source = match (script, command) {
                (Some(path), None) => ScriptSource::File(path),
                (None, Some(inline)) => ScriptSource::Inline(inline),
                _ => return Err(SbsError::ScriptMissing(PathBuf::from("-"))),
            };
            let opts = SubmitOptions {
                name,
                mem,
                mail,
                procs,
                afterok,
                hold,
                stdout,
                stderr,
                wd,
            };
            let id = commands::submit(&store, &source, &opts)?;
            println!("{id}");
        }
        Command::Status { id, json } => {
            let jobs = commands::status(&store, id)?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&jobs).expect("job summaries serialize")
                );
            } else {
                print!("{}", commands::render_table(&jobs));
            }
        }
        Command::Hold { ids } => commands::hold(&store, &ids)?,
        Command::Release { ids } => commands::release(&store, &ids)?,
        Command::Cancel { ids } => commands::cancel(&store, &ids)?,
        Command::Cleanup { id } => {
            let report = commands::cleanup(&store, id)?;
            for cleaned in &report.cleaned {
                println!("cleaned {cleaned}");
            }
            for (kept, dependent) in &report.kept {
                println!("kept {kept} (job {dependent} depends on it)");
            }
        }
        Command::Run {
            max_procs,
            max_mem,
            forever,
            poll_secs,
        } => {
            let mut config = RunnerConfig::default().with_poll_interval(Duration::from_secs(poll_secs));
            if let Some(procs) = max_procs {
                config.max_procs = procs.max(1);
            }
            if let Some(raw) = &max_mem {
                config.max_mem_mb = parse_mem_mb(raw).ok_or(SbsError::BadSetting {
                    key: "mem",
                    value: raw.clone(),
                })?;
            }
            config.forever = forever;
            let shutdown = install_shutdown_handler();
            Dispatcher::new(store, config).run(shutdown).await?;
        }
        Command::Shutdown { kill } => commands::shutdown(&store, kill)?,
    }
    Ok(())
}
