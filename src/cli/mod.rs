pub mod report;
pub mod tasks;
pub mod tracking;

use std::{path::PathBuf, process::ExitCode};

use anyhow::Result;
use clap::{Parser, Subcommand};
use report::ReportCommand;
use tasks::{DeleteTarget, EditTarget, ListTarget};
use tracing::level_filters::LevelFilter;

use crate::{
    context::TrackerContext,
    error::{StorageError, TrackerError},
    storage::NewTask,
    utils::{
        dir::TrackerPaths,
        logging::{enable_logging, CLI_PREFIX, DAEMON_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "tally", version, long_about = None)]
#[command(about = "Track time spent on tasks and summarize it by day, week or month")]
pub struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(
        long,
        global = true,
        env = "TASKTALLY_DIR",
        help = "Application directory. By default state goes to $XDG_STATE_HOME or $HOME/.local/state and the database to $XDG_DATA_HOME or $HOME/.local/share"
    )]
    dir: Option<PathBuf>,
    #[arg(long, global = true, help = "Print logs to the console")]
    log: bool,
    #[arg(long, global = true, help = "Log level, for example info or trace. Defaults to RUST_LOG or debug")]
    log_filter: Option<LevelFilter>,
}

#[derive(Debug, Clone, clap::Args)]
pub struct TaskArgs {
    #[arg(help = "Name of the task. Created on first use")]
    task: String,
    #[arg(long, help = "Tags stored with a newly created task")]
    tags: Option<String>,
    #[arg(long, help = "Description stored with a newly created task")]
    description: Option<String>,
}

impl From<TaskArgs> for NewTask {
    fn from(value: TaskArgs) -> Self {
        NewTask {
            name: value.task,
            tags: value.tags.unwrap_or_default(),
            description: value.description.unwrap_or_default(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Start tracking a task in the background")]
    Start {
        #[command(flatten)]
        task: TaskArgs,
    },
    #[command(about = "Track a task in this terminal until interrupted with Ctrl-C")]
    Track {
        #[command(flatten)]
        task: TaskArgs,
    },
    #[command(about = "Stop tracking and save the session")]
    Stop,
    #[command(about = "Show the task being tracked")]
    Status,
    #[command(about = "Summarize recorded time over a day, week or month")]
    Report {
        #[command(flatten)]
        command: ReportCommand,
    },
    #[command(about = "List tasks or records")]
    List {
        #[command(subcommand)]
        target: ListTarget,
    },
    #[command(about = "Change a task")]
    Edit {
        #[command(subcommand)]
        target: EditTarget,
    },
    #[command(about = "Delete tasks or records")]
    Delete {
        #[command(subcommand)]
        target: DeleteTarget,
    },
}

pub fn run_cli(args: Args) -> Result<()> {
    let paths = TrackerPaths::resolve(args.dir)?;

    // The tracking loop runs in the process started by these commands.
    let prefix = match args.commands {
        Commands::Start { .. } | Commands::Track { .. } => DAEMON_PREFIX,
        _ => CLI_PREFIX,
    };
    let level = args
        .log_filter
        .or_else(|| args.log.then_some(LevelFilter::TRACE));
    enable_logging(prefix, &paths.log_dir, level, args.log)?;

    let context = TrackerContext::new(paths);
    match args.commands {
        Commands::Start { task } => tracking::start(&context, task.into()),
        Commands::Track { task } => tracking::track(&context, task.into()),
        Commands::Stop => tracking::stop(&context),
        Commands::Status => tracking::status(&context),
        Commands::Report { command } => report::process_report_command(&context, command),
        Commands::List { target } => tasks::list(&context, target),
        Commands::Edit { target } => tasks::edit(&context, target),
        Commands::Delete { target } => tasks::delete(&context, target),
    }
}

/// `0` for success and for the benign [TrackerError::NotTracking], `1` for everything else.
pub fn exit_code(error: &anyhow::Error) -> ExitCode {
    match error.downcast_ref::<TrackerError>() {
        Some(TrackerError::NotTracking) => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}

/// One line describing `error` for the terminal.
pub fn error_line(error: &anyhow::Error) -> String {
    let storage = error
        .downcast_ref::<StorageError>()
        .or_else(|| match error.downcast_ref::<TrackerError>() {
            Some(TrackerError::Storage(e)) => Some(e),
            _ => None,
        });
    match storage {
        Some(e) => format!("tally: storage failure: {e}"),
        None => format!("tally: {error}"),
    }
}
