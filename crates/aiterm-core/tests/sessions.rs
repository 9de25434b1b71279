//! Session registry against real shells.

#![cfg(unix)]

use aiterm_core::assistant::strip_ansi;
use aiterm_core::session::{RegistrySettings, SessionState};
use aiterm_core::{EventBus, SessionEvent, SessionId, SessionOptions, SessionRegistry};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::sync::broadcast::error::RecvError;

const TIMEOUT: Duration = Duration::from_secs(10);
const PROMPT: &str = "$ ";

fn settings(cwd: &TempDir) -> RegistrySettings {
    RegistrySettings {
        default_shell: "/bin/sh".to_string(),
        default_working_directory: cwd.path().to_string_lossy().into_owned(),
        default_environment: [("PS1".to_string(), PROMPT.to_string())].into_iter().collect(),
        destroy_grace: Duration::from_millis(500),
        ..RegistrySettings::default()
    }
}

/// Output lines with trailing whitespace and any leading prompts removed.
fn output_lines(output: &str) -> Vec<&str> {
    output
        .lines()
        .map(|line| {
            let mut line = line.trim_end();
            while let Some(rest) = line.strip_prefix(PROMPT) {
                line = rest;
            }
            line
        })
        .collect()
}

fn registry(cwd: &TempDir) -> SessionRegistry {
    SessionRegistry::with_settings(Arc::new(EventBus::new()), settings(cwd))
}

/// Forward bus events for `id` onto a std channel so tests can wait with a
/// timeout.
fn events_for(registry: &SessionRegistry, id: &SessionId) -> Receiver<SessionEvent> {
    let mut rx = registry.subscribe();
    let id = id.clone();
    let (tx, out) = mpsc::channel();
    thread::spawn(move || loop {
        match rx.blocking_recv() {
            Ok(event) => {
                if event.session_id() == &id && tx.send(event).is_err() {
                    break;
                }
            }
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        }
    });
    out
}

/// Accumulate output until some line equals `line`. Returns everything read.
fn wait_for_line(events: &Receiver<SessionEvent>, line: &str) -> String {
    let deadline = Instant::now() + TIMEOUT;
    let mut output = String::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(SessionEvent::Data { data, .. }) => {
                output.push_str(&String::from_utf8_lossy(&data));
                let clean = strip_ansi(&output);
                if output_lines(&clean).contains(&line) {
                    return clean;
                }
            }
            Ok(SessionEvent::Exit { exit, .. }) => {
                panic!("session exited ({:?}) before {:?}; output: {:?}", exit, line, output)
            }
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {
                panic!("timed out waiting for {:?}; output: {:?}", line, output)
            }
            Err(RecvTimeoutError::Disconnected) => panic!("event stream closed"),
        }
    }
}

/// Wait for the Exit event; returns it along with any events after it
/// within `quiet`.
fn wait_for_exit(
    events: &Receiver<SessionEvent>,
    quiet: Duration,
) -> (SessionEvent, Vec<SessionEvent>) {
    let deadline = Instant::now() + TIMEOUT;
    let exit = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(remaining) {
            Ok(event @ SessionEvent::Exit { .. }) => break event,
            Ok(_) => {}
            Err(e) => panic!("no exit event: {:?}", e),
        }
    };
    let mut after = Vec::new();
    while let Ok(event) = events.recv_timeout(quiet) {
        after.push(event);
    }
    (exit, after)
}

mod io {
    use super::*;

    #[test]
    fn echo_reaches_subscribers() {
        let cwd = TempDir::new().unwrap();
        let registry = registry(&cwd);
        let id = registry.create(SessionOptions::new()).unwrap();
        let events = events_for(&registry, &id);

        registry.write(&id, b"echo hi\n").unwrap();

        wait_for_line(&events, "hi");
        registry.destroy(&id);
    }

    #[test]
    fn write_order_is_preserved() {
        let cwd = TempDir::new().unwrap();
        let registry = registry(&cwd);
        let id = registry.create(SessionOptions::new()).unwrap();
        let events = events_for(&registry, &id);

        registry.write(&id, b"echo one\n").unwrap();
        registry.write(&id, b"echo two\n").unwrap();
        registry.write(&id, b"echo three\n").unwrap();

        let output = wait_for_line(&events, "three");
        let lines = output_lines(&output);
        let position = |word: &str| lines.iter().position(|l| *l == word).unwrap();
        assert!(position("one") < position("two"));
        assert!(position("two") < position("three"));

        registry.destroy(&id);
    }

    #[test]
    fn resize_is_visible_to_the_shell() {
        let cwd = TempDir::new().unwrap();
        let registry = registry(&cwd);
        let id = registry.create(SessionOptions::new()).unwrap();
        let events = events_for(&registry, &id);

        registry.resize(&id, 120, 40).unwrap();
        registry.write(&id, b"stty size\n").unwrap();

        wait_for_line(&events, "40 120");
        let record = registry.get(&id).unwrap();
        assert_eq!((record.columns, record.rows), (120, 40));

        registry.destroy(&id);
    }

    #[test]
    fn environment_and_cwd_are_applied() {
        let cwd = TempDir::new().unwrap();
        let registry = registry(&cwd);
        let id = registry
            .create(SessionOptions::new().env("AITERM_TEST_VAR", "marker-value"))
            .unwrap();
        let events = events_for(&registry, &id);

        registry.write(&id, b"echo \"$AITERM_TEST_VAR\"\n").unwrap();
        wait_for_line(&events, "marker-value");

        registry.write(&id, b"pwd -P\n").unwrap();
        let expected = cwd.path().canonicalize().unwrap();
        wait_for_line(&events, &expected.to_string_lossy());

        registry.destroy(&id);
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn destroy_emits_single_exit_and_no_later_data() {
        let cwd = TempDir::new().unwrap();
        let registry = registry(&cwd);
        let id = registry.create(SessionOptions::new()).unwrap();
        let events = events_for(&registry, &id);

        registry.write(&id, b"echo ready\n").unwrap();
        wait_for_line(&events, "ready");

        assert!(registry.destroy(&id));

        let (exit, after) = wait_for_exit(&events, Duration::from_millis(300));
        assert!(matches!(exit, SessionEvent::Exit { .. }));
        assert!(after
            .iter()
            .all(|e| matches!(e, SessionEvent::Destroyed { .. })));
        assert!(registry.get(&id).is_none());
        assert!(!registry.destroy(&id));
    }

    #[test]
    fn natural_exit_reports_code() {
        let cwd = TempDir::new().unwrap();
        let registry = registry(&cwd);
        let id = registry.create(SessionOptions::new()).unwrap();
        let events = events_for(&registry, &id);

        registry.write(&id, b"exit 3\n").unwrap();

        let (exit, _) = wait_for_exit(&events, Duration::from_millis(50));
        match exit {
            SessionEvent::Exit { exit, .. } => assert_eq!(exit.code, Some(3)),
            other => panic!("unexpected {:?}", other),
        }

        let record = registry.get(&id).unwrap();
        assert_eq!(record.state, SessionState::Exited);
        assert_eq!(record.exit_code, Some(3));

        // Still tracked until destroyed; writes are no-ops.
        assert!(registry.write(&id, b"echo ignored\n").is_ok());
        assert!(registry.resize(&id, 100, 30).is_ok());
        assert!(registry.destroy(&id));
        assert!(!registry.destroy(&id));
    }

    #[test]
    fn exit_is_reported_while_background_job_holds_pty() {
        let cwd = TempDir::new().unwrap();
        let registry = registry(&cwd);
        let id = registry.create(SessionOptions::new()).unwrap();
        let events = events_for(&registry, &id);

        registry.write(&id, b"sleep 5 &\nexit 4\n").unwrap();

        let (exit, after) = wait_for_exit(&events, Duration::from_millis(300));
        match exit {
            SessionEvent::Exit { exit, .. } => assert_eq!(exit.code, Some(4)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(after
            .iter()
            .all(|e| !matches!(e, SessionEvent::Exit { .. } | SessionEvent::Data { .. })));
        assert_eq!(registry.get(&id).unwrap().state, SessionState::Exited);
        registry.destroy(&id);
    }

    #[test]
    fn forced_destroy_reports_signal() {
        let cwd = TempDir::new().unwrap();
        let registry = registry(&cwd);
        let id = registry.create(SessionOptions::new()).unwrap();
        let events = events_for(&registry, &id);

        registry
            .write(&id, b"trap '' HUP; echo trapped-$((1 + 1)); exec sleep 30\n")
            .unwrap();
        wait_for_line(&events, "trapped-2");

        assert!(registry.destroy(&id));

        let (exit, _) = wait_for_exit(&events, Duration::from_millis(50));
        match exit {
            SessionEvent::Exit { exit, .. } => {
                assert_eq!(exit.signal.as_deref(), Some("SIGKILL"));
                assert_eq!(exit.code, None);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn destroy_with_background_job_still_exits() {
        let cwd = TempDir::new().unwrap();
        let registry = registry(&cwd);
        let id = registry.create(SessionOptions::new()).unwrap();
        let events = events_for(&registry, &id);

        registry.write(&id, b"sleep 5 &\necho bg-$((1 + 1))\n").unwrap();
        wait_for_line(&events, "bg-2");

        assert!(registry.destroy(&id));
        let (exit, _) = wait_for_exit(&events, Duration::from_millis(50));
        assert!(matches!(exit, SessionEvent::Exit { .. }));
    }

    #[test]
    fn ids_are_not_reused_after_destroy() {
        let cwd = TempDir::new().unwrap();
        let registry = registry(&cwd);

        let first = registry.create(SessionOptions::new()).unwrap();
        assert!(registry.destroy(&first));
        let second = registry.create(SessionOptions::new()).unwrap();

        assert_ne!(first, second);
        assert!(second.sequence() > first.sequence());
        registry.destroy(&second);
    }

    #[test]
    fn sessions_are_independent() {
        let cwd = TempDir::new().unwrap();
        let registry = registry(&cwd);
        let doomed = registry.create(SessionOptions::new()).unwrap();
        let survivor = registry.create(SessionOptions::new()).unwrap();
        let events = events_for(&registry, &survivor);

        assert!(registry.destroy(&doomed));
        registry.write(&survivor, b"echo alive\n").unwrap();

        wait_for_line(&events, "alive");
        assert_eq!(registry.list_all().len(), 1);
        registry.destroy(&survivor);
    }

    #[test]
    fn shutdown_destroys_everything() {
        let cwd = TempDir::new().unwrap();
        let registry = registry(&cwd);
        registry.create(SessionOptions::new()).unwrap();
        registry.create(SessionOptions::new()).unwrap();

        registry.shutdown();

        assert!(registry.is_empty());
    }
}

mod context {
    use super::*;

    #[test]
    fn snapshot_reflects_activity() {
        let cwd = TempDir::new().unwrap();
        let registry = registry(&cwd);
        let id = registry.create(SessionOptions::new()).unwrap();
        let events = events_for(&registry, &id);

        registry.write(&id, b"echo snap\n").unwrap();
        wait_for_line(&events, "snap");
        registry
            .set_selection(&id, Some("selected words".to_string()))
            .unwrap();

        let snapshot = registry.context_snapshot(&id).unwrap();
        assert_eq!(snapshot.recent_commands, Some(vec!["echo snap".to_string()]));
        assert!(snapshot.recent_output.unwrap().contains("snap"));
        assert_eq!(
            snapshot.working_directory.as_deref(),
            Some(cwd.path().to_string_lossy().as_ref())
        );
        assert_eq!(snapshot.selected_text.as_deref(), Some("selected words"));

        registry.destroy(&id);
    }

    #[test]
    fn transcript_records_io() {
        let cwd = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let registry = SessionRegistry::with_settings(
            Arc::new(EventBus::new()),
            RegistrySettings {
                transcript_dir: Some(logs.path().to_path_buf()),
                ..settings(&cwd)
            },
        );
        let id = registry.create(SessionOptions::new()).unwrap();
        let events = events_for(&registry, &id);

        registry.write(&id, b"echo logged\n").unwrap();
        wait_for_line(&events, "logged");
        registry.destroy(&id);
        wait_for_exit(&events, Duration::from_millis(50));

        let transcript =
            std::fs::read_to_string(logs.path().join(format!("{}.log", id))).unwrap();
        assert!(transcript.contains("STDIN: echo logged\\n"));
        assert!(transcript.contains("STDOUT: "));
        assert!(transcript.contains("EXIT: "));
    }
}
