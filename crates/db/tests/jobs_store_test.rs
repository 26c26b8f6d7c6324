//! Integration tests for the job store: lifecycle guards, listing, recovery.

use chrono::Utc;
use ferry_core::{JobStatus, Operation, TransferProgress};
use ferry_db::{Database, JobFilter, JobOutcome, NewJob, ProgressUpdate};
use pretty_assertions::assert_eq;

fn reading(percent: u8, done: u64) -> ProgressUpdate {
    ProgressUpdate {
        progress: percent,
        transfer: Some(TransferProgress {
            percent,
            transferred_bytes: done,
            total_bytes: 1000,
            speed: Some("10 B/s".into()),
            eta: Some("5s".into()),
        }),
        live_text: format!("{done} B / 1000 B, {percent}%"),
    }
}

fn outcome(status: JobStatus, exit_status: i32) -> JobOutcome {
    JobOutcome {
        status,
        progress: if status == JobStatus::Completed { 100 } else { 0 },
        transfer: None,
        live_text: "tail".into(),
        log_text: "full log".into(),
        error_text: (status == JobStatus::Failed).then(|| "boom".to_string()),
        exit_status,
        download_token: None,
        finished_at: Utc::now(),
    }
}

async fn running_job(db: &Database) -> i64 {
    let id = db
        .insert_job(&NewJob::new(Operation::Sync, "remote:src", "/mnt/dst"))
        .await
        .unwrap();
    assert!(db.mark_job_running(id).await.unwrap());
    id
}

#[tokio::test]
async fn test_ids_are_distinct_and_increasing() {
    let db = Database::new_in_memory().await.unwrap();
    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(
            db.insert_job(&NewJob::new(Operation::Copy, format!("src{i}"), "dst"))
                .await
                .unwrap(),
        );
    }
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sorted, ids);
}

#[tokio::test]
async fn test_ids_are_not_reused_after_purge() {
    let db = Database::new_in_memory().await.unwrap();
    let first = running_job(&db).await;
    db.finish_job(first, &outcome(JobStatus::Completed, 0)).await.unwrap();
    assert!(db.delete_job(first).await.unwrap());

    let second = db
        .insert_job(&NewJob::new(Operation::Copy, "a", "b"))
        .await
        .unwrap();
    assert!(second > first);
}

#[tokio::test]
async fn test_mark_running_only_from_pending() {
    let db = Database::new_in_memory().await.unwrap();
    let id = running_job(&db).await;
    assert!(!db.mark_job_running(id).await.unwrap());

    let job = db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Running);
    assert!(job.started_at.is_some());
}

#[tokio::test]
async fn test_progress_never_decreases_in_store() {
    let db = Database::new_in_memory().await.unwrap();
    let id = running_job(&db).await;

    assert!(db.update_job_progress(id, &reading(60, 600)).await.unwrap());
    assert!(db.update_job_progress(id, &reading(30, 300)).await.unwrap());

    let job = db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.progress, 60);
    let transfer = job.transfer.unwrap();
    assert_eq!(transfer.transferred_bytes, 300);
    assert_eq!(transfer.total_bytes, 1000);
    assert_eq!(transfer.speed.as_deref(), Some("10 B/s"));
    assert_eq!(job.live_text, "300 B / 1000 B, 30%");
}

#[tokio::test]
async fn test_progress_update_ignored_when_not_running() {
    let db = Database::new_in_memory().await.unwrap();
    let id = db
        .insert_job(&NewJob::new(Operation::Copy, "a", "b"))
        .await
        .unwrap();
    assert!(!db.update_job_progress(id, &reading(50, 500)).await.unwrap());
    assert_eq!(db.get_job(id).await.unwrap().unwrap().progress, 0);
}

#[tokio::test]
async fn test_finish_sets_terminal_fields_once() {
    let db = Database::new_in_memory().await.unwrap();
    let id = running_job(&db).await;

    assert!(db.finish_job(id, &outcome(JobStatus::Completed, 0)).await.unwrap());
    // A second writer (e.g. a late cancel) cannot overwrite a terminal row.
    assert!(!db.finish_job(id, &outcome(JobStatus::Cancelled, 143)).await.unwrap());

    let job = db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert_eq!(job.exit_status, 0);
    assert_eq!(job.log_text, "full log");
    assert!(job.error_text.is_none());
    assert!(job.finished_at.is_some());
}

#[tokio::test]
async fn test_list_filters_and_orders_newest_first() {
    let db = Database::new_in_memory().await.unwrap();
    let a = running_job(&db).await;
    let b = running_job(&db).await;
    let c = db
        .insert_job(&NewJob::new(Operation::Check, "x", "y"))
        .await
        .unwrap();
    db.finish_job(a, &outcome(JobStatus::Failed, 1)).await.unwrap();

    let all = db.list_jobs(&JobFilter::default()).await.unwrap();
    let ids: Vec<i64> = all.iter().map(|j| j.id).collect();
    assert_eq!(ids, vec![c, b, a]);

    let running = db.list_jobs(&JobFilter::with_status(JobStatus::Running)).await.unwrap();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].id, b);

    let page = db
        .list_jobs(&JobFilter {
            status: None,
            limit: Some(1),
            offset: Some(1),
        })
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, b);

    assert_eq!(db.count_jobs(None).await.unwrap(), 3);
    assert_eq!(db.count_jobs(Some(JobStatus::Failed)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_interrupt_orphans_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ferry.db");

    let (orphan, pending, done) = {
        let db = Database::new(&path).await.unwrap();
        let orphan = running_job(&db).await;
        let pending = db
            .insert_job(&NewJob::new(Operation::Copy, "a", "b"))
            .await
            .unwrap();
        let done = running_job(&db).await;
        db.finish_job(done, &outcome(JobStatus::Completed, 0)).await.unwrap();
        db.close().await;
        (orphan, pending, done)
    };

    let db = Database::new(&path).await.unwrap();
    let flipped = db.interrupt_orphaned_jobs().await.unwrap();
    assert_eq!(flipped, vec![orphan, pending]);

    let interrupted = db
        .list_jobs(&JobFilter::with_status(JobStatus::Interrupted))
        .await
        .unwrap();
    let mut ids: Vec<i64> = interrupted.iter().map(|j| j.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![orphan, pending]);
    assert_eq!(
        db.get_job(done).await.unwrap().unwrap().status,
        JobStatus::Completed
    );
    assert!(db.interrupt_orphaned_jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_resume_resets_run_and_bumps_attempt() {
    let db = Database::new_in_memory().await.unwrap();
    let id = running_job(&db).await;
    db.update_job_progress(id, &reading(40, 400)).await.unwrap();
    db.finish_job(id, &outcome(JobStatus::Failed, 1)).await.unwrap();

    assert!(db.reset_job_for_resume(id).await.unwrap());
    let job = db.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempt, 2);
    assert_eq!(job.progress, 0);
    assert_eq!(job.exit_status, -1);
    assert!(job.error_text.is_none());
    assert!(job.transfer.is_none());
    assert!(job.finished_at.is_none());
    assert_eq!(job.source, "remote:src");
}

#[tokio::test]
async fn test_resume_rejected_from_completed_and_cancelled() {
    let db = Database::new_in_memory().await.unwrap();
    let completed = running_job(&db).await;
    db.finish_job(completed, &outcome(JobStatus::Completed, 0)).await.unwrap();
    let cancelled = running_job(&db).await;
    db.finish_job(cancelled, &outcome(JobStatus::Cancelled, 143)).await.unwrap();

    assert!(!db.reset_job_for_resume(completed).await.unwrap());
    assert!(!db.reset_job_for_resume(cancelled).await.unwrap());
    assert!(!db.reset_job_for_resume(9999).await.unwrap());
}

#[tokio::test]
async fn test_delete_only_terminal() {
    let db = Database::new_in_memory().await.unwrap();
    let id = running_job(&db).await;
    assert!(!db.delete_job(id).await.unwrap());

    db.finish_job(id, &outcome(JobStatus::Cancelled, 143)).await.unwrap();
    assert!(db.delete_job(id).await.unwrap());
    assert!(db.get_job(id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_download_token_cleared_once() {
    let db = Database::new_in_memory().await.unwrap();
    let id = db
        .insert_job(&NewJob::new(Operation::PrepareDownload, "/data/a", "/stage/1.tar.gz"))
        .await
        .unwrap();
    db.mark_job_running(id).await.unwrap();
    let mut done = outcome(JobStatus::Completed, 0);
    done.download_token = Some("tok".into());
    db.finish_job(id, &done).await.unwrap();

    assert_eq!(
        db.get_job(id).await.unwrap().unwrap().download_token.as_deref(),
        Some("tok")
    );
    assert!(db.clear_download_token(id, "tok").await.unwrap());
    assert!(!db.clear_download_token(id, "tok").await.unwrap());
    assert!(db.get_job(id).await.unwrap().unwrap().download_token.is_none());
}

#[tokio::test]
async fn test_clear_all_download_tokens() {
    let db = Database::new_in_memory().await.unwrap();
    let mut ids = Vec::new();
    for token in ["a", "b"] {
        let id = db
            .insert_job(&NewJob::new(Operation::PrepareDownload, "/data/a", "/stage/x.tar.gz"))
            .await
            .unwrap();
        db.mark_job_running(id).await.unwrap();
        let mut done = outcome(JobStatus::Completed, 0);
        done.download_token = Some(token.into());
        db.finish_job(id, &done).await.unwrap();
        ids.push(id);
    }
    let plain = running_job(&db).await;

    assert_eq!(db.clear_all_download_tokens().await.unwrap(), 2);
    assert_eq!(db.clear_all_download_tokens().await.unwrap(), 0);
    for id in ids {
        let job = db.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.download_token, None);
        assert_eq!(job.status, JobStatus::Completed);
    }
    assert_eq!(db.get_job(plain).await.unwrap().unwrap().status, JobStatus::Running);
}
