//! Shared fixtures: stand-in transfer tool and archiver scripts, and an
//! orchestrator wired to them over a file-backed store.
#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ferry_core::{Archiver, Job, JobId, JobStatus, TransferTool};
use ferry_db::Database;
use ferry_server::{JobOrchestrator, OrchestratorSettings};

/// Behaviour keyed on the source argument:
/// - contains `missing`: prints an rclone-style error and exits 3
/// - contains `slow`: prints rising progress for about a minute
/// - anything else: two progress lines, then success
const FAKE_TOOL: &str = r#"#!/bin/sh
verb="$1"
src="$2"
dst="$3"
echo $$ > "$dst.pid" 2>/dev/null
case "$src" in
  *missing*)
    echo "2024/05/01 10:00:00 ERROR : $src: directory not found" >&2
    exit 3
    ;;
  *slow*)
    i=1
    while [ $i -le 600 ]; do
      echo "Transferred:   	  $i KiB / 600 KiB, $((i / 6))%, 10 KiB/s, ETA 1m"
      sleep 0.1
      i=$((i + 1))
    done
    exit 0
    ;;
esac
echo "Transferred:   	    5 MiB / 10 MiB, 50%, 1 MiB/s, ETA 5s"
sleep 0.3
echo "Transferred:   	   10 MiB / 10 MiB, 100%, 1 MiB/s, ETA 0s"
echo "INFO  : $verb finished"
exit 0
"#;

/// `-czf <artifact> -- <paths...>`: fails if any path is absent, otherwise
/// writes a small stand-in archive.
const FAKE_ARCHIVER: &str = r#"#!/bin/sh
artifact="$2"
shift 3
for p in "$@"; do
  if [ ! -e "$p" ]; then
    echo "tar: $p: Cannot stat: No such file or directory" >&2
    echo "tar: Exiting with failure status due to previous errors" >&2
    printf 'partial' > "$artifact"
    exit 2
  fi
done
printf 'archive of %s\n' "$*" > "$artifact"
"#;

pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

pub fn fake_tool(dir: &Path) -> PathBuf {
    write_script(dir, "fake-rclone", FAKE_TOOL)
}

pub fn fake_archiver(dir: &Path) -> PathBuf {
    write_script(dir, "fake-tar", FAKE_ARCHIVER)
}

pub fn settings_for(dir: &Path, grace: Duration) -> OrchestratorSettings {
    OrchestratorSettings {
        tool: TransferTool::new(fake_tool(dir), Vec::new()),
        archiver: Archiver::new(fake_archiver(dir)),
        grace,
        progress_flush: Duration::from_millis(50),
        tail_bytes: 4096,
        log_cap_bytes: 64 * 1024,
    }
}

pub async fn open_db(dir: &Path) -> Database {
    Database::new(&dir.join("ferry.db")).await.unwrap()
}

pub async fn orchestrator(dir: &Path) -> JobOrchestrator {
    JobOrchestrator::new(open_db(dir).await, settings_for(dir, Duration::from_secs(2)))
}

pub async fn wait_for<F>(orchestrator: &JobOrchestrator, id: JobId, what: &str, done: F) -> Job
where
    F: Fn(&Job) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(20);
    loop {
        let job = orchestrator.get(id).await.unwrap();
        if done(&job) {
            return job;
        }
        assert!(
            Instant::now() < deadline,
            "job {id} never became {what}; last status {}",
            job.status
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

pub async fn wait_for_terminal(orchestrator: &JobOrchestrator, id: JobId) -> Job {
    wait_for(orchestrator, id, "terminal", |job| job.status.is_terminal()).await
}

pub async fn wait_for_running(orchestrator: &JobOrchestrator, id: JobId) -> Job {
    wait_for(orchestrator, id, "running", |job| job.status == JobStatus::Running).await
}

/// Whether a process with this pid still exists.
pub fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn read_pid(path: &Path) -> u32 {
    std::fs::read_to_string(path)
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}
