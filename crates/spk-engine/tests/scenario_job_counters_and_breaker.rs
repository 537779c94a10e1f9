//! Counter-invariant and circuit-breaker arithmetic, driven directly
//! through `Job::record_outcome`; no database required.

use spk_engine::job::{DbResult, Job, JobStatus, MAX_RETAINED_ERRORS, SNAPSHOT_ERROR_CAP};

const THRESHOLD: f64 = 10.0;

fn ok(db: &str) -> DbResult {
    DbResult::success(db, 1.0)
}

fn bad(db: &str) -> DbResult {
    DbResult::failed(db, "SELECT FROM is not valid".to_string(), 1.0)
}

fn skip(db: &str) -> DbResult {
    DbResult::skipped(db, "already applied", 1.0)
}

#[tokio::test]
async fn completed_always_equals_sum_of_outcomes() {
    let job = Job::new("v1", 9);
    job.mark_in_progress().await;

    let outcomes = [
        ok("db_1"),
        skip("db_2"),
        bad("db_3"),
        ok("db_4"),
        ok("db_5"),
        skip("db_6"),
        bad("db_7"),
        ok("db_8"),
        ok("db_9"),
    ];
    for outcome in &outcomes {
        job.record_outcome(outcome, THRESHOLD).await;
        let snap = job.snapshot().await;
        assert_eq!(
            snap.completed,
            snap.successful + snap.failed + snap.skipped,
            "invariant must hold at every observation point"
        );
        assert!(snap.completed <= snap.total);
    }

    job.finish().await;
    let snap = job.snapshot().await;
    assert_eq!(snap.completed, 9);
    assert_eq!(snap.successful, 5);
    assert_eq!(snap.skipped, 2);
    assert_eq!(snap.failed, 2);
    assert_eq!(snap.status, JobStatus::Completed);
}

#[tokio::test]
async fn one_failure_within_warmup_cannot_trip_the_breaker() {
    // 50 databases, 10% threshold: one failure among the first 10
    // completions must not stop the job.
    let job = Job::new("v1", 50);
    job.mark_in_progress().await;

    job.record_outcome(&bad("db_1"), THRESHOLD).await;
    for i in 2..=10 {
        job.record_outcome(&ok(&format!("db_{i}")), THRESHOLD).await;
    }
    assert!(
        !job.stop_requested(),
        "breaker must stay closed within the warm-up window"
    );
}

#[tokio::test]
async fn breaker_trips_after_warmup_when_ratio_exceeds_threshold() {
    // 20 databases: 3 failures = 15% of total > 10%, but only after more
    // than 10 completions.
    let job = Job::new("v1", 20);
    job.mark_in_progress().await;

    for i in 1..=3 {
        job.record_outcome(&bad(&format!("db_{i}")), THRESHOLD).await;
    }
    for i in 4..=10 {
        job.record_outcome(&ok(&format!("db_{i}")), THRESHOLD).await;
    }
    assert!(!job.stop_requested(), "10 completions is still warm-up");

    job.record_outcome(&ok("db_11"), THRESHOLD).await;
    assert!(
        job.stop_requested(),
        "11th completion with 3/20 failed must trip the breaker"
    );

    job.finish().await;
    assert_eq!(job.snapshot().await.status, JobStatus::Stopped);
}

#[tokio::test]
async fn low_failure_ratio_never_trips() {
    // 100 databases, 1 failure = 1% < 10%: full run completes.
    let job = Job::new("v1", 100);
    job.mark_in_progress().await;

    job.record_outcome(&bad("db_1"), THRESHOLD).await;
    for i in 2..=100 {
        job.record_outcome(&ok(&format!("db_{i}")), THRESHOLD).await;
    }
    assert!(!job.stop_requested());

    job.finish().await;
    let snap = job.snapshot().await;
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.failed, 1);
    assert_eq!(snap.errors.len(), 1);
    assert_eq!(snap.errors[0].database, "db_1");
}

#[tokio::test]
async fn all_failures_terminate_as_failed() {
    let job = Job::new("v1", 3);
    job.mark_in_progress().await;
    for i in 1..=3 {
        job.record_outcome(&bad(&format!("db_{i}")), THRESHOLD).await;
    }
    job.finish().await;
    assert_eq!(job.snapshot().await.status, JobStatus::Failed);
}

#[tokio::test]
async fn stop_beats_all_failed_in_terminal_computation() {
    let job = Job::new("v1", 12);
    job.mark_in_progress().await;
    job.request_stop();
    for i in 1..=2 {
        job.record_outcome(&bad(&format!("db_{i}")), THRESHOLD).await;
    }
    job.finish().await;
    assert_eq!(job.snapshot().await.status, JobStatus::Stopped);
}

#[tokio::test]
async fn terminal_jobs_freeze_their_counters() {
    let job = Job::new("v1", 5);
    job.mark_in_progress().await;
    job.record_outcome(&ok("db_1"), THRESHOLD).await;
    job.finish().await;

    let before = job.snapshot().await;
    assert!(before.status.is_terminal());

    // Late outcomes must not move anything.
    job.record_outcome(&ok("db_2"), THRESHOLD).await;
    job.record_outcome(&bad("db_3"), THRESHOLD).await;

    let after = job.snapshot().await;
    assert_eq!(after.status, before.status);
    assert_eq!(after.completed, before.completed);
    assert_eq!(after.successful, before.successful);
    assert_eq!(after.failed, before.failed);
}

#[tokio::test]
async fn error_log_is_bounded_and_snapshot_view_is_capped() {
    let job = Job::new("v1", 300);
    job.mark_in_progress().await;
    for i in 1..=150 {
        // Threshold 100 disables the breaker so every failure is merged.
        job.record_outcome(&bad(&format!("db_{i}")), 100.0).await;
    }

    let snap = job.snapshot().await;
    assert_eq!(snap.failed, 150);
    assert_eq!(
        snap.errors.len(),
        SNAPSHOT_ERROR_CAP,
        "snapshot exposes a truncated error view"
    );
    // The job retains more than the snapshot shows, up to the cap.
    assert!(MAX_RETAINED_ERRORS >= snap.errors.len());
    assert_eq!(snap.errors[0].database, "db_1", "first errors are retained");
}
