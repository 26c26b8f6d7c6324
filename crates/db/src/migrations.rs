// crates/db/src/migrations.rs
//! Schema migrations, applied in order. Entry `n` (0-based) brings the
//! store to `user_version = n + 1`; append new entries, never edit old ones.

pub const MIGRATIONS: &[&str] = &[
    r#"
CREATE TABLE jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    operation TEXT NOT NULL,
    source TEXT NOT NULL,
    destination TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    attempt INTEGER NOT NULL DEFAULT 1,
    progress INTEGER NOT NULL DEFAULT 0,
    transferred_bytes INTEGER,
    total_bytes INTEGER,
    speed TEXT,
    eta TEXT,
    live_text TEXT NOT NULL DEFAULT '',
    log_text TEXT NOT NULL DEFAULT '',
    error_text TEXT,
    created_at INTEGER NOT NULL,
    started_at INTEGER,
    finished_at INTEGER,
    exit_status INTEGER NOT NULL DEFAULT -1,
    download_token TEXT
);
CREATE INDEX idx_jobs_status ON jobs(status);
"#,
];
