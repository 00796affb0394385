//! End-to-end job lifecycle: allocate, ingress, external tool, result,
//! reap. Uses a shell concatenation as the "combine" tool so the test has
//! no dependency on the real processors.

use std::fs;
use std::time::Duration;

use paperjet::ingress;
use paperjet::reaper;
use paperjet::runner::{self, Invocation};
use paperjet::workspace::Workspaces;

const MAX_BYTES: u64 = 1024 * 1024;
const TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn combine_job_runs_and_workspace_is_reaped_after_ttl() {
    let root = tempfile::tempdir().unwrap();
    let workspaces = Workspaces::open(root.path(), Duration::from_secs(900)).unwrap();

    // Submit two small valid inputs.
    let mut job = workspaces.allocate().unwrap();
    let first = ingress::store(&job.dir, "first.pdf", b"%PDF first\n", MAX_BYTES, &["pdf"]).unwrap();
    let second =
        ingress::store(&job.dir, "second.pdf", b"%PDF second\n", MAX_BYTES, &["pdf"]).unwrap();
    assert!(first.starts_with(&job.dir));
    assert!(second.starts_with(&job.dir));

    // "Combine" transformation via an external tool invocation.
    let combine = Invocation::new(
        "/bin/sh",
        vec![
            "-c".to_string(),
            "cat first.pdf second.pdf > combined.pdf".to_string(),
        ],
    )
    .current_dir(&job.dir);
    runner::run(&combine, TIMEOUT).await.unwrap();

    let out = job.dir.join("combined.pdf");
    job.outputs.push(out.clone());
    assert_eq!(job.outputs.len(), 1);
    assert_eq!(fs::read(&out).unwrap(), b"%PDF first\n%PDF second\n");

    // While the job is in flight its lease shields it from the reaper,
    // even with the retention threshold forced to zero.
    std::thread::sleep(Duration::from_millis(50));
    reaper::sweep_once(root.path(), Duration::ZERO, &workspaces.active());
    assert!(job.dir.exists());

    // After the response the lease drops and the next sweep past the TTL
    // removes the whole workspace.
    let dir = job.dir.clone();
    drop(job);
    reaper::sweep_once(root.path(), Duration::ZERO, &workspaces.active());
    assert!(!dir.exists());
}

#[tokio::test]
async fn failed_tool_leaves_workspace_for_the_reaper() {
    let root = tempfile::tempdir().unwrap();
    let workspaces = Workspaces::open(root.path(), Duration::from_secs(900)).unwrap();

    let job = workspaces.allocate().unwrap();
    ingress::store(&job.dir, "input.pdf", b"%PDF\n", MAX_BYTES, &["pdf"]).unwrap();

    let failing = Invocation::new("/bin/sh", vec!["-c".to_string(), "exit 2".to_string()])
        .current_dir(&job.dir);
    runner::run(&failing, TIMEOUT).await.unwrap_err();

    // No rollback on failure: the partial workspace stays until expiry.
    assert!(job.dir.join("input.pdf").exists());

    let dir = job.dir.clone();
    drop(job);
    std::thread::sleep(Duration::from_millis(50));
    reaper::sweep_once(root.path(), Duration::ZERO, &workspaces.active());
    assert!(!dir.exists());
}
