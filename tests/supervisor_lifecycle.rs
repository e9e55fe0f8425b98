//! End-to-end supervisor tests
//!
//! Each test packages a small shell script as the client binary, serves it
//! from the in-memory index and drives the supervisor against it.

#![cfg(unix)]

mod common;

use std::time::Duration;

use common::*;
use grid::GridError;
use grid::supervisor::{NotificationKind, SupervisorEvent, SupervisorState};
use tokio::sync::broadcast;

const SIGNER_SCRIPT: &str = r#"#!/bin/sh
echo "INFO starting fake signer"
echo '{"jsonrpc":"2.0","id":1,"method":"ui_approveTx","params":[{"transaction":{"to":"0x07a565b7ed7d7a678680a4c162885bedbb695fe0","value":"0x1"}}]}'
echo '{"jsonrpc":"2.0","id":7,"method":"ui_showInfo","params":[{"text":"hello"}]}'
read ack
echo "ack $ack"
echo "INFO HTTP endpoint opened url=http://127.0.0.1:8550"
while read line; do
  echo "got $line"
done
"#;

fn drain(rx: &mut broadcast::Receiver<SupervisorEvent>) -> Vec<SupervisorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn lifecycle(events: &[SupervisorEvent]) -> Vec<String> {
    events
        .iter()
        .map(|e| e.name().to_string())
        .filter(|n| ["starting", "started", "connect", "stopping", "stopped", "error"].contains(&n.as_str()))
        .collect()
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_full_lifecycle_with_approval() {
    let h = harness(SIGNER_SCRIPT, config());
    let supervisor = &h.supervisor;
    let mut rx = supervisor.subscribe();

    supervisor.start().await.unwrap();
    assert!(supervisor.is_running());
    assert!(supervisor.pid().await.is_some());
    assert_eq!(supervisor.release().await.unwrap().version, "1.9.0-unstable");

    // showInfo is acknowledged without involving the caller
    let ack = wait_for_log(supervisor, |l| l.starts_with("ack ")).await;
    assert!(ack.contains(r#""id":7"#), "{ack}");
    assert!(ack.contains(r#""result":true"#), "{ack}");

    wait_for_state(supervisor, SupervisorState::Connected).await;

    let events = drain(&mut rx);
    let approval = events
        .iter()
        .find_map(|e| match e {
            SupervisorEvent::Notification(n) if n.kind == NotificationKind::ApproveTx => Some(n.clone()),
            _ => None,
        })
        .expect("approveTx notification");
    assert!(approval.kind.requires_approval());
    assert_eq!(approval.method, "ui_approveTx");
    assert!(events.iter().any(|e| e.name() == "showInfo"));
    assert!(events.iter().any(|e| matches!(e, SupervisorEvent::DownloadProgress { percent: 100 })));

    supervisor.approve(&approval, true).await.unwrap();
    let reply = wait_for_log(supervisor, |l| l.starts_with("got ") && l.contains(r#""id":1"#)).await;
    assert!(reply.contains(r#""result":true"#), "{reply}");

    supervisor.send(&serde_json::json!({"method": "ping"})).await.unwrap();
    wait_for_log(supervisor, |l| l.contains("ping")).await;

    assert!(supervisor.stop().await.unwrap());
    assert_eq!(supervisor.state(), SupervisorState::Stopped);
    assert!(!supervisor.is_running());
    assert!(supervisor.pid().await.is_none());

    let mut all = events;
    all.extend(drain(&mut rx));
    assert_eq!(
        lifecycle(&all),
        vec!["starting", "started", "connect", "stopping", "stopped"]
    );
}

#[tokio::test]
async fn test_clean_exit_and_restart_keeps_logs() {
    let h = harness("#!/bin/sh\necho run\n", config());
    let supervisor = &h.supervisor;

    supervisor.start().await.unwrap();
    wait_for_state(supervisor, SupervisorState::Stopped).await;

    supervisor.start().await.unwrap();
    wait_for_state(supervisor, SupervisorState::Stopped).await;

    let runs = supervisor.logs().await.iter().filter(|l| *l == "run").count();
    assert_eq!(runs, 2);
    // the second start came from the cache
    assert_eq!(h.index.download_count(), 1);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_exit_before_output_fails_start() {
    let h = harness("#!/bin/sh\nexit 3\n", config());
    let supervisor = &h.supervisor;
    let mut rx = supervisor.subscribe();

    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, GridError::Start(_)), "{err:?}");
    assert!(
        matches!(err.root(), GridError::AbnormalExit { code: Some(3), .. }),
        "{err:?}"
    );
    assert_eq!(supervisor.state(), SupervisorState::Error);
    assert!(!supervisor.is_running());

    let failure = drain(&mut rx)
        .into_iter()
        .find_map(|e| match e {
            SupervisorEvent::Error(f) => Some(f),
            _ => None,
        })
        .expect("error event");
    assert_eq!(failure.exit_code, Some(3));
}

#[tokio::test]
async fn test_abnormal_exit_after_start_reports_last_logs() {
    let script = "#!/bin/sh\necho booting\necho 'fatal: bad flag' >&2\nsleep 0.2\nexit 3\n";
    let h = harness(script, config());
    let supervisor = &h.supervisor;
    let mut rx = supervisor.subscribe();

    supervisor.start().await.unwrap();
    wait_for_state(supervisor, SupervisorState::Error).await;
    assert!(!supervisor.is_running());

    let last = supervisor.last_logs(10).await;
    assert!(last.iter().any(|l| l == "booting"));
    assert!(last.iter().any(|l| l == "fatal: bad flag"));

    // let the exit bookkeeping finish before collecting events
    tokio::time::sleep(Duration::from_millis(50)).await;
    let failure = drain(&mut rx)
        .into_iter()
        .find_map(|e| match e {
            SupervisorEvent::Error(f) => Some(f),
            _ => None,
        })
        .expect("error event");
    assert_eq!(failure.exit_code, Some(3));
    assert!(failure.last_logs.iter().any(|l| l == "fatal: bad flag"));

    // an errored supervisor can be started again
    let err = supervisor.start().await;
    assert!(err.is_ok(), "{err:?}");
}

#[tokio::test]
async fn test_silent_process_times_out() {
    let config = config().with_startup_timeout(Some(Duration::from_millis(200)));
    let h = harness("#!/bin/sh\nexec sleep 5\n", config);
    let supervisor = &h.supervisor;

    let err = supervisor.start().await.unwrap_err();
    assert!(
        matches!(err.root(), GridError::StartupTimeout(_)),
        "{err:?}"
    );
    assert_eq!(supervisor.state(), SupervisorState::Error);

    // the interrupt sent on timeout brings the process down
    assert!(supervisor.stop().await.unwrap());
    assert!(supervisor.pid().await.is_none());
    assert_eq!(supervisor.state(), SupervisorState::Error);
}

#[tokio::test]
async fn test_send_without_process() {
    let h = harness("#!/bin/sh\necho unused\n", config());
    let err = h.supervisor.send(&serde_json::json!({"id": 1})).await.unwrap_err();
    assert!(matches!(err, GridError::NotRunning));

    // stopping an idle supervisor is a no-op
    assert!(h.supervisor.stop().await.unwrap());
    assert_eq!(h.supervisor.state(), SupervisorState::Stopped);
}

#[tokio::test]
async fn test_extraction_failure_fails_start() {
    let index = FakeIndex::new().with_archive(ARCHIVE, tar_gz(&[("elsewhere/readme", b"x")]));
    let h = harness_with_index(index, config());
    let supervisor = &h.supervisor;
    let mut rx = supervisor.subscribe();

    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, GridError::Start(_)), "{err:?}");
    assert!(matches!(err.root(), GridError::Extraction { .. }), "{err:?}");
    assert_eq!(supervisor.state(), SupervisorState::Error);
    assert!(supervisor.pid().await.is_none());

    // the downloaded release stays inspectable
    let release = supervisor.release().await.unwrap();
    assert_eq!(release.file_name, ARCHIVE);
    assert!(release.archive_path.is_some());
    assert!(release.binary_path.is_none());

    let events = drain(&mut rx);
    assert_eq!(lifecycle(&events), ["starting", "error"]);
}

#[tokio::test]
async fn test_download_failure_fails_start() {
    let data = client_archive("#!/bin/sh\necho unused\n");
    let h = harness_with_index(FakeIndex::new().listing_only(entry(ARCHIVE, &data)), config());
    let supervisor = &h.supervisor;
    let mut rx = supervisor.subscribe();

    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err.root(), GridError::Download { .. }), "{err:?}");
    assert_eq!(supervisor.state(), SupervisorState::Error);
    assert!(cache_files(h.cache.path()).is_empty());
    assert!(drain(&mut rx).iter().any(|e| matches!(e, SupervisorEvent::Error(_))));
}

#[tokio::test]
async fn test_stop_before_connect() {
    // prints output but never the readiness marker
    let h = harness("#!/bin/sh\necho up\nwhile read line; do :; done\n", config());
    let supervisor = &h.supervisor;
    let mut rx = supervisor.subscribe();

    supervisor.start().await.unwrap();
    assert_eq!(supervisor.state(), SupervisorState::Started);

    assert!(supervisor.stop().await.unwrap());
    wait_for_state(supervisor, SupervisorState::Stopped).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        lifecycle(&drain(&mut rx)),
        ["starting", "started", "stopping", "stopped"]
    );
}

#[tokio::test]
async fn test_stop_while_stdin_is_full() {
    // never reads stdin, so writes park once the pipe buffer fills
    let h = harness("#!/bin/sh\necho up\nexec sleep 30\n", config());
    h.supervisor.start().await.unwrap();

    let supervisor = h.supervisor.clone();
    let flood = tokio::spawn(async move {
        let payload = "x".repeat(4096);
        for id in 0..100 {
            if supervisor
                .send(&serde_json::json!({"id": id, "data": payload}))
                .await
                .is_err()
            {
                break;
            }
        }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stopped = tokio::time::timeout(Duration::from_secs(5), h.supervisor.stop()).await;
    assert!(matches!(stopped, Ok(Ok(true))), "{stopped:?}");
    assert_eq!(h.supervisor.state(), SupervisorState::Stopped);

    // the parked writer is released once the process is gone
    tokio::time::timeout(Duration::from_secs(5), flood)
        .await
        .expect("writer still blocked")
        .unwrap();
}
