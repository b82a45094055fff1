use ansi_term::Colour;
use anyhow::Result;
use chrono::{Local, Utc};
use tracing::info;

use crate::{
    context::TrackerContext,
    daemon::{
        self,
        detach::{Daemonizer, Foreground},
        finalizer::SessionFinalizer,
        lifecycle::{SessionStatus, StaleReason},
        state::ActiveSession,
        StartOutcome,
    },
    error::TrackerError,
    storage::{DurableRecord, NewTask, StoredRecord},
    utils::{runtime::single_thread_runtime, time::format_hms},
};

const DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn start(context: &TrackerContext, task: NewTask) -> Result<()> {
    match daemon::start_tracking(context, &task, &Daemonizer, print_recovered)? {
        StartOutcome::Detached => {
            println!("Started tracking {}", Colour::Green.bold().paint(&task.name));
        }
        // Detached side, its session is saved by `tally stop`.
        StartOutcome::Finished(session) => {
            info!("Tracker for {} exits", session.task_name);
        }
    }
    Ok(())
}

pub fn track(context: &TrackerContext, task: NewTask) -> Result<()> {
    let outcome = daemon::start_tracking(context, &task, &Foreground, |recovered| {
        print_recovered(recovered);
        println!(
            "Tracking {}, press Ctrl-C to stop",
            Colour::Green.bold().paint(&task.name)
        );
    })?;
    if outcome == StartOutcome::Detached {
        return Ok(());
    }

    let store = context.state_store();
    let mut storage = context.open_storage()?;
    let saved = single_thread_runtime()?
        .block_on(SessionFinalizer::new(&store, &mut storage).finalize())?;
    match saved {
        Some(saved) => println!("{}", worked_on(&saved.record)),
        None => println!("Session was already saved"),
    }
    Ok(())
}

pub fn stop(context: &TrackerContext) -> Result<()> {
    let report = single_thread_runtime()?.block_on(daemon::stop_tracking(context))?;
    match (report.record, report.pid) {
        (Some(saved), _) => println!("{}", worked_on(&saved.record)),
        (None, Some(pid)) => println!("Stopped tracker {pid}, its session was already saved"),
        (None, None) => {}
    }
    Ok(())
}

pub fn status(context: &TrackerContext) -> Result<()> {
    let status = single_thread_runtime()?.block_on(daemon::status(context))?;
    match status {
        SessionStatus::Idle => println!("Not tracking"),
        SessionStatus::Tracking { pid, session } => {
            println!(
                "Tracking {} (pid {pid})",
                Colour::Green.bold().paint(&session.task_name)
            );
            print_session(&session);
        }
        SessionStatus::Stale(StaleReason::Starting { pid }) => {
            println!("Tracker {pid} is starting");
        }
        SessionStatus::Stale(StaleReason::ProcessGone { pid, leftover }) => {
            println!(
                "{}",
                Colour::Yellow.paint(format!("Tracker {pid} exited without saving its session"))
            );
            if let Some(session) = leftover {
                print_unsaved(&session);
            }
        }
        SessionStatus::Stale(StaleReason::Unfinalized(session)) => print_unsaved(&session),
        SessionStatus::Stale(StaleReason::Corrupt(reason)) => {
            return Err(TrackerError::CorruptState {
                path: context.paths.state_file.clone(),
                reason: format!("{reason}, the state was reset"),
            }
            .into());
        }
    }
    Ok(())
}

fn print_recovered(recovered: Option<&StoredRecord>) {
    if let Some(stored) = recovered {
        println!(
            "{} {}",
            Colour::Yellow.paint("Saved the session a previous tracker left behind."),
            worked_on(&stored.record)
        );
    }
}

fn print_unsaved(session: &ActiveSession) {
    println!(
        "{}",
        Colour::Yellow.paint(format!(
            "Unsaved session of {}, run `tally stop` to save it",
            session.task_name
        ))
    );
    print_session(session);
}

fn print_session(session: &ActiveSession) {
    println!("Started:  {}", session.start.with_timezone(&Local).format(DATE_FORMAT));
    println!(
        "Current:  {}",
        session.last_observed_end.with_timezone(&Local).format(DATE_FORMAT)
    );
    println!("Duration: {}", format_hms(session.elapsed_seconds));
    let age = (Utc::now() - session.last_observed_end).num_seconds();
    if age > 5 {
        println!("Last updated {} ago", format_hms(age));
    }
}

fn worked_on(record: &DurableRecord) -> String {
    format!(
        "Worked on {} for {:.2}hrs ({}) {}",
        Colour::Green.bold().paint(&record.task_name),
        record.duration_seconds as f64 / 3600.,
        format_hms(record.duration_seconds),
        Colour::Green.paint("✔")
    )
}
