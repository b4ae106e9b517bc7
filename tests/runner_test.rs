mod common;

use chrono::Utc;
use common::StubTools;
use deimos::{resolve, ResultStore, StageIssue, ToolInvocation, ToolRunner};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn runner(stubs: &StubTools) -> ToolRunner {
    ToolRunner::new(2, CancellationToken::new())
        .with_search_path(stubs.search_path())
        .with_kill_grace(Duration::from_millis(500))
}

#[tokio::test]
async fn test_hanging_tool_is_killed_at_timeout() {
    let stubs = StubTools::new();
    stubs.script("nmap", "echo 'partial scan output'\nsleep 30\necho 'never printed'");

    let inv = ToolInvocation::new("nmap", Duration::from_secs(1));
    let start = Instant::now();
    let outcome = runner(&stubs).run(&inv).await;
    let elapsed = start.elapsed();

    assert!(outcome.timed_out);
    assert_eq!(outcome.exit_code, None);
    assert!(elapsed < Duration::from_secs(4), "runner blocked for {:?}", elapsed);
    assert!(outcome.stdout.contains("partial scan output"));
    assert!(!outcome.stdout.contains("never printed"));
    assert_eq!(outcome.issue(), Some(StageIssue::ToolTimeout("nmap".into())));
}

#[tokio::test]
async fn test_background_children_do_not_hold_the_runner() {
    let stubs = StubTools::new();
    // Child keeps stdout open after the tool itself exits
    stubs.script("whatweb", "sleep 30 &\necho done");

    let inv = ToolInvocation::new("whatweb", Duration::from_secs(10));
    let start = Instant::now();
    let outcome = runner(&stubs).run(&inv).await;

    assert_eq!(outcome.exit_code, Some(0));
    assert!(outcome.stdout.contains("done"));
    assert!(start.elapsed() < Duration::from_secs(5));
}

fn alive(pid: i32) -> bool {
    // SAFETY: signal 0 only checks that the process exists
    unsafe { libc::kill(pid, 0) == 0 }
}

fn read_pid(stubs: &StubTools) -> i32 {
    std::fs::read_to_string(stubs.path().join("bg.pid"))
        .expect("background pid not recorded")
        .trim()
        .parse()
        .expect("pid is not a number")
}

#[tokio::test]
async fn test_leftover_holding_output_is_killed() {
    let stubs = StubTools::new();
    stubs.script(
        "gobuster",
        "sleep 30 &\necho $! > \"$(dirname \"$0\")/bg.pid\"\necho done",
    );

    let outcome = runner(&stubs)
        .run(&ToolInvocation::new("gobuster", Duration::from_secs(10)))
        .await;
    assert_eq!(outcome.exit_code, Some(0));

    let pid = read_pid(&stubs);
    let deadline = Instant::now() + Duration::from_secs(2);
    while alive(pid) && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!alive(pid), "background sleep {} survived", pid);
}

#[tokio::test]
async fn test_clean_exit_does_not_signal_the_group() {
    let stubs = StubTools::new();
    // detached from the pipes, so the tool counts as finished at exit
    stubs.script(
        "whatweb",
        "sleep 30 >/dev/null 2>&1 &\necho $! > \"$(dirname \"$0\")/bg.pid\"\necho done",
    );

    let start = Instant::now();
    let outcome = runner(&stubs)
        .run(&ToolInvocation::new("whatweb", Duration::from_secs(10)))
        .await;
    assert_eq!(outcome.exit_code, Some(0));
    assert!(start.elapsed() < Duration::from_secs(5));

    let pid = read_pid(&stubs);
    let survived = alive(pid);
    // SAFETY: plain kill of the process this test started
    unsafe {
        libc::kill(pid, libc::SIGKILL);
    }
    assert!(survived, "group was signalled after a clean exit");
}

#[tokio::test]
async fn test_nonzero_exit_and_stderr() {
    let stubs = StubTools::new();
    stubs.script("gobuster", "echo 'wordlist not found' >&2\nexit 3");

    let outcome = runner(&stubs)
        .run(&ToolInvocation::new("gobuster", Duration::from_secs(5)))
        .await;

    assert_eq!(outcome.exit_code, Some(3));
    assert!(!outcome.success());
    assert!(outcome.stderr.contains("wordlist not found"));
    assert_eq!(
        outcome.issue(),
        Some(StageIssue::ToolNonZeroExit { tool: "gobuster".into(), code: Some(3) })
    );
}

#[tokio::test]
async fn test_stdin_is_forwarded() {
    let stubs = StubTools::new();
    stubs.script("openssl", "cat");

    let inv = ToolInvocation::new("openssl", Duration::from_secs(5))
        .args(["x509", "-noout"])
        .stdin("-----BEGIN CERTIFICATE-----\nABC\n-----END CERTIFICATE-----\n");
    let outcome = runner(&stubs).run(&inv).await;

    assert!(outcome.success());
    assert!(outcome.stdout.contains("ABC"));
}

#[tokio::test]
async fn test_missing_tool_reports_without_spawning() {
    let stubs = StubTools::new();
    let runner = runner(&stubs);

    assert!(!runner.is_available("nuclei"));
    let outcome = runner
        .run(&ToolInvocation::new("nuclei", Duration::from_secs(5)))
        .await;
    assert!(outcome.tool_missing);
    assert_eq!(outcome.issue(), Some(StageIssue::ToolMissing(vec!["nuclei".into()])));
    assert_eq!(runner.stats().missing, 1);
    assert_eq!(runner.stats().executed, 0);
}

#[tokio::test]
async fn test_cancellation_kills_running_tool() {
    let stubs = StubTools::new();
    stubs.script("nmap", "sleep 30");

    let cancel = CancellationToken::new();
    let runner = ToolRunner::new(1, cancel.clone())
        .with_search_path(stubs.search_path())
        .with_kill_grace(Duration::from_millis(500));

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let outcome = runner
        .run(&ToolInvocation::new("nmap", Duration::from_secs(60)))
        .await;

    assert!(outcome.interrupted);
    assert!(!outcome.timed_out);
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(outcome.issue(), Some(StageIssue::Interrupted));
}

#[tokio::test]
async fn test_run_captured_appends_sections() {
    let stubs = StubTools::new();
    stubs.script("curl", "echo \"HTTP/1.1 200 OK\"");
    let out = TempDir::new().unwrap();
    let target = resolve("example.com").unwrap();
    let store = ResultStore::create(out.path(), &target, Utc::now()).unwrap();
    let runner = runner(&stubs);

    let inv = ToolInvocation::new("curl", Duration::from_secs(5)).args(["-sS", "-I"]);
    runner.run_captured(&inv, &store, "02_http_tls_probe.txt").await;
    runner.run_captured(&inv, &store, "02_http_tls_probe.txt").await;

    let content = std::fs::read_to_string(store.path_for("02_http_tls_probe.txt")).unwrap();
    assert_eq!(content.matches("==> curl -sS -I (exit=0").count(), 2);
    assert_eq!(content.matches("HTTP/1.1 200 OK").count(), 2);
    assert_eq!(runner.stats().succeeded, 2);
}
