use anyhow::{bail, Result};
use chrono::Local;
use clap::Subcommand;
use tracing::info;

use crate::{
    context::TrackerContext,
    error::StorageError,
    storage::{validate_task_name, RecordQuery, Storage, Task, TaskRef, TaskUpdate},
    utils::{runtime::single_thread_runtime, time::format_hms},
};

const DEFAULT_MAX_ENTRIES: usize = 10;

#[derive(Subcommand, Debug)]
pub enum ListTarget {
    #[command(about = "List tasks with their totals")]
    Tasks {
        #[arg(help = "Task name or id")]
        task: Option<String>,
    },
    #[command(about = "List the latest records")]
    Records {
        #[arg(help = "Record id")]
        id: Option<i64>,
        #[arg(long, help = "Only records of this task name or id")]
        task: Option<String>,
        #[arg(
            long,
            default_value_t = DEFAULT_MAX_ENTRIES,
            conflicts_with = "all",
            help = "Number of latest records to show"
        )]
        max_entries: usize,
        #[arg(long, help = "Show every record")]
        all: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum EditTarget {
    #[command(about = "Rename a task or change its tags and description")]
    Task {
        #[arg(help = "Task name or id")]
        task: String,
        #[arg(long, help = "New name")]
        name: Option<String>,
        #[arg(long, help = "New tags")]
        tags: Option<String>,
        #[arg(long, help = "New description")]
        description: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum DeleteTarget {
    #[command(about = "Delete tasks together with their records")]
    Task {
        #[arg(required = true, help = "Task names or ids")]
        tasks: Vec<String>,
    },
    #[command(about = "Delete records")]
    Record {
        #[arg(required = true, help = "Record ids")]
        ids: Vec<i64>,
    },
}

pub fn list(context: &TrackerContext, target: ListTarget) -> Result<()> {
    let storage = context.open_storage()?;
    match target {
        ListTarget::Tasks { task } => {
            let tasks = storage.get_tasks(task.as_deref().map(TaskRef::parse))?;
            if tasks.is_empty() {
                println!("No tasks");
            }
            for task in tasks {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    task.id,
                    task.name,
                    format_hms(task.total),
                    task.tags,
                    task.description
                );
            }
        }
        ListTarget::Records {
            id,
            task,
            max_entries,
            all,
        } => {
            let query = RecordQuery {
                record_id: id,
                task: task.as_deref().map(TaskRef::parse),
                latest: (!all).then_some(max_entries),
                ..Default::default()
            };
            let records = storage.get_records(&query)?;
            if records.is_empty() {
                println!("No records");
            }
            for stored in records {
                let record = &stored.record;
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    stored.id,
                    record.task_name,
                    record.start.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                    record.end.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                    format_hms(record.duration_seconds)
                );
            }
        }
    }
    Ok(())
}

pub fn edit(context: &TrackerContext, target: EditTarget) -> Result<()> {
    let EditTarget::Task {
        task,
        name,
        tags,
        description,
    } = target;
    if let Some(name) = &name {
        validate_task_name(name)?;
    }
    let mut storage = context.open_storage()?;
    let existing = find_task(&storage, &task)?;
    refuse_active(context, &existing)?;
    let updated = storage.update_task(
        existing.id,
        &TaskUpdate {
            name,
            tags,
            description,
        },
    )?;
    info!("Edited task {}", updated.id);
    println!(
        "{}\t{}\t{}\t{}",
        updated.id, updated.name, updated.tags, updated.description
    );
    Ok(())
}

pub fn delete(context: &TrackerContext, target: DeleteTarget) -> Result<()> {
    let mut storage = context.open_storage()?;
    match target {
        DeleteTarget::Task { tasks } => {
            for task in tasks {
                let existing = find_task(&storage, &task)?;
                refuse_active(context, &existing)?;
                let records = storage.delete_task(existing.id)?;
                println!("Deleted task {} and {records} records", existing.name);
            }
        }
        DeleteTarget::Record { ids } => {
            for id in ids {
                if storage.delete_record(id)? {
                    println!("Deleted record {id}");
                } else {
                    println!("No record {id}");
                }
            }
        }
    }
    Ok(())
}

fn find_task(storage: &dyn Storage, task: &str) -> Result<Task, StorageError> {
    let reference = TaskRef::parse(task);
    storage
        .get_tasks(Some(reference.clone()))?
        .into_iter()
        .next()
        .ok_or_else(|| StorageError::UnknownTask(reference.to_string()))
}

/// The tracker saves its session under the task name, so the active task must stay as it is.
fn refuse_active(context: &TrackerContext, task: &Task) -> Result<()> {
    let active = single_thread_runtime()?
        .block_on(context.state_store().read())
        .ok()
        .flatten();
    if active.is_some_and(|session| session.task_name == task.name) {
        bail!("task {} is being tracked, stop it first", task.name);
    }
    Ok(())
}
