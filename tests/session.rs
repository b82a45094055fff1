use std::time::Duration;

use anyhow::Result;
use chrono::{Local, Utc};
use tasktally::{
    context::TrackerContext,
    daemon::{lifecycle::SessionStatus, prepare, serve, status, stop_tracking},
    error::TrackerError,
    report::{build_report, period::PeriodKind},
    storage::{NewTask, RecordQuery, Storage},
    utils::{clock::DefaultClock, dir::TrackerPaths},
};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn full_session_is_recorded_and_reported() -> Result<()> {
    let dir = tempdir()?;
    let context = TrackerContext::new(TrackerPaths::in_dir(dir.path()));
    let task = NewTask {
        name: "write docs".into(),
        tags: "work".into(),
        description: "user guide".into(),
    };

    let prepared = prepare(&context, &task).await?;
    assert_eq!(prepared.recovered, None);
    let shutdown = CancellationToken::new();
    let paths = context.paths.clone();
    let token = shutdown.clone();
    let tracker = tokio::spawn(async move {
        serve(
            prepared.guard,
            &paths,
            "write docs",
            Duration::from_millis(50),
            Box::new(DefaultClock),
            token,
        )
        .await
    });

    tokio::time::sleep(Duration::from_millis(1300)).await;
    let SessionStatus::Tracking { session, .. } = status(&context).await? else {
        panic!("tracker should be running");
    };
    assert_eq!(session.task_name, "write docs");
    assert!(session.elapsed_seconds >= 1);

    assert!(matches!(
        prepare(&context, &NewTask::named("other")).await,
        Err(TrackerError::AlreadyTracking { .. })
    ));

    shutdown.cancel();
    let finished = tracker.await??;
    assert!(!context.paths.pid_file.exists());

    let report = stop_tracking(&context).await?;
    let saved = report.record.expect("session should be saved");
    assert_eq!(saved.record.start, finished.start);
    assert_eq!(saved.record.end, finished.last_observed_end);
    assert_eq!(
        saved.record.duration_seconds,
        (finished.last_observed_end - finished.start).num_seconds()
    );

    assert_eq!(status(&context).await?, SessionStatus::Idle);
    assert!(matches!(
        stop_tracking(&context).await,
        Err(TrackerError::NotTracking)
    ));

    let storage = context.open_storage()?;
    assert_eq!(storage.get_records(&RecordQuery::default())?.len(), 1);
    let tasks = storage.get_tasks(None)?;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].tags, "work");
    assert_eq!(tasks[0].total, saved.record.duration_seconds);

    let today = saved.record.start.with_timezone(&Local).date_naive();
    let table = build_report(&storage, PeriodKind::Day, today, &Local)?;
    assert_eq!(table.columns, ["write docs"]);
    assert_eq!(table.total(), saved.record.duration_seconds);
    assert!(Utc::now() >= saved.record.end);
    Ok(())
}
