#[cfg(unix)]
mod session_integration {
    use std::sync::Arc;
    use std::time::Duration;

    use ptyctl_core::{PumpStrategy, Session, SessionConfig, SupervisorConfig};
    use ptyctl_proto::{Event, SessionState};
    use tempfile::TempDir;
    use tokio::runtime::Handle;
    use tokio::sync::mpsc;

    const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

    struct Harness {
        session: Session,
        rx: mpsc::UnboundedReceiver<Event>,
        dir: TempDir,
    }

    fn supervisor_config(strategy: PumpStrategy) -> SupervisorConfig {
        SupervisorConfig {
            shell: "/bin/sh".into(),
            strategy,
            ..SupervisorConfig::default()
        }
    }

    fn harness_with(command: &str, supervisor: SupervisorConfig) -> Harness {
        let dir = TempDir::new().expect("temp dir");
        let config = SessionConfig::new(command)
            .with_working_directory(dir.path())
            .with_supervisor(supervisor);
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session::new(config, Arc::new(tx), Handle::current());
        Harness { session, rx, dir }
    }

    fn harness(command: &str) -> Harness {
        harness_with(command, supervisor_config(PumpStrategy::Auto))
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    /// Collects events up to and including the terminal one.
    async fn until_terminal(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            let event = next_event(rx).await;
            let done = event.is_terminal();
            events.push(event);
            if done {
                return events;
            }
        }
    }

    async fn wait_started(rx: &mut mpsc::UnboundedReceiver<Event>) -> u32 {
        match next_event(rx).await {
            Event::Started { pid, pgid } => {
                assert_eq!(pid, pgid);
                pid
            }
            other => panic!("expected started, got {other:?}"),
        }
    }

    fn output_text(events: &[Event]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                Event::Output { data } => Some(data.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Asserts nothing arrives after the terminal event.
    async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<Event>) {
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err(), "event after terminal event");
    }

    #[tokio::test]
    async fn echo_streams_output_then_completes() {
        let mut h = harness("echo hello");
        assert!(h.session.execute());

        let events = until_terminal(&mut h.rx).await;
        assert!(matches!(events[0], Event::Started { .. }), "{events:?}");
        assert_eq!(
            events[1],
            Event::Output {
                data: "$ echo hello\n".to_string()
            }
        );
        assert!(output_text(&events).contains("hello\r\n"));
        assert_eq!(events.last(), Some(&Event::Completed { returncode: 0 }));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

        h.session.wait_until_finished().await;
        assert_eq!(h.session.state(), SessionState::Finished);
        assert!(h.session.process().is_none());
        assert_quiet(&mut h.rx).await;
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_reported() {
        let mut h = harness("exit 3");
        h.session.execute();

        let events = until_terminal(&mut h.rx).await;
        assert_eq!(events.last(), Some(&Event::Completed { returncode: 3 }));
    }

    #[tokio::test]
    async fn both_strategies_deliver_the_same_output() {
        for strategy in [PumpStrategy::Readiness, PumpStrategy::Blocking] {
            let mut h = harness_with("echo one; echo two", supervisor_config(strategy));
            h.session.execute();

            let events = until_terminal(&mut h.rx).await;
            let text = output_text(&events);
            assert!(text.contains("one\r\ntwo\r\n"), "{strategy:?}: {text:?}");
            assert_eq!(events.last(), Some(&Event::Completed { returncode: 0 }));
        }
    }

    #[tokio::test]
    async fn output_without_trailing_newline_precedes_completion() {
        let mut h = harness("printf done");
        h.session.execute();

        let events = until_terminal(&mut h.rx).await;
        assert!(output_text(&events).ends_with("done"), "{events:?}");
        assert_eq!(events.last(), Some(&Event::Completed { returncode: 0 }));
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced() {
        let mut h = harness(r"printf 'a\377b\n'");
        h.session.execute();

        let events = until_terminal(&mut h.rx).await;
        assert!(output_text(&events).contains("a\u{FFFD}b"), "{events:?}");
        assert_eq!(events.last(), Some(&Event::Completed { returncode: 0 }));
    }

    #[tokio::test]
    async fn kill_ends_long_running_command() {
        let mut h = harness("sleep 30");

        // Repeated runs on one session: each kill yields exactly one `killed`.
        for _ in 0..3 {
            assert!(h.session.execute());
            wait_started(&mut h.rx).await;
            h.session.kill();

            let events = until_terminal(&mut h.rx).await;
            assert_eq!(events.last(), Some(&Event::Killed));
            h.session.wait_until_finished().await;
        }
        assert_quiet(&mut h.rx).await;
    }

    #[tokio::test]
    async fn terminate_moves_through_terminating() {
        let mut h = harness("sleep 30");
        h.session.execute();
        wait_started(&mut h.rx).await;

        h.session.terminate();
        assert_eq!(h.session.state(), SessionState::Terminating);

        let events = until_terminal(&mut h.rx).await;
        assert_eq!(events.last(), Some(&Event::Terminated));
        h.session.wait_until_finished().await;
        assert_eq!(h.session.state(), SessionState::Finished);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn terminate_reaches_background_jobs() {
        let mut h = harness("sleep 30 & echo $! > bg.pid; wait");
        h.session.execute();
        wait_started(&mut h.rx).await;

        let pid_file = h.dir.path().join("bg.pid");
        let mut background = None;
        for _ in 0..100 {
            if let Ok(text) = std::fs::read_to_string(&pid_file)
                && let Ok(pid) = text.trim().parse::<u32>()
            {
                background = Some(pid);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let background = background.expect("background pid written");

        h.session.terminate();
        let events = until_terminal(&mut h.rx).await;
        assert_eq!(events.last(), Some(&Event::Terminated));

        // Gone, or a zombie waiting for a reaper that is not us.
        let stat = format!("/proc/{background}/stat");
        for _ in 0..100 {
            match std::fs::read_to_string(&stat) {
                Err(_) => return,
                Ok(line) if line.contains(") Z ") => return,
                Ok(_) => {}
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("background job {background} survived terminate");
    }

    #[tokio::test]
    async fn signals_without_execution_report_not_running() {
        let mut h = harness("sleep 30");
        h.session.terminate();
        h.session.kill();

        assert_eq!(next_event(&mut h.rx).await, Event::NotRunning);
        assert_eq!(next_event(&mut h.rx).await, Event::NotRunning);
        assert_eq!(h.session.state(), SessionState::Idle);
        assert_quiet(&mut h.rx).await;
    }

    #[tokio::test]
    async fn signals_after_finish_report_not_running() {
        let mut h = harness("true");
        h.session.execute();
        until_terminal(&mut h.rx).await;
        h.session.wait_until_finished().await;

        h.session.kill();
        assert_eq!(next_event(&mut h.rx).await, Event::NotRunning);
    }

    #[tokio::test]
    async fn input_reaches_stdin_with_newline() {
        let mut h = harness("read line; echo \"got:$line\"");
        h.session.execute();
        wait_started(&mut h.rx).await;

        h.session.send_input("ping");
        let events = until_terminal(&mut h.rx).await;
        let sent = events
            .iter()
            .position(|e| *e == Event::InputSent { data: "ping".to_string() })
            .expect("input_sent");
        assert!(sent < events.len() - 1);
        assert!(output_text(&events).contains("got:ping"), "{events:?}");
        assert_eq!(events.last(), Some(&Event::Completed { returncode: 0 }));
    }

    #[tokio::test]
    async fn input_outside_running_is_dropped() {
        let mut h = harness("true");
        h.session.send_input("early");
        h.session.execute();
        until_terminal(&mut h.rx).await;
        h.session.wait_until_finished().await;

        h.session.send_input("late");
        assert_quiet(&mut h.rx).await;
    }

    #[tokio::test]
    async fn execute_while_running_is_ignored() {
        let mut h = harness("sleep 30");
        assert!(h.session.execute());
        assert!(!h.session.execute());
        wait_started(&mut h.rx).await;
        assert!(!h.session.execute());

        h.session.kill();
        let events = until_terminal(&mut h.rx).await;
        assert!(!events.iter().any(|e| matches!(e, Event::Started { .. })));
        assert_eq!(events.last(), Some(&Event::Killed));
    }

    #[tokio::test]
    async fn reexecute_picks_up_mirrored_command() {
        let mut h = harness("echo first");
        h.session.execute();
        let first = until_terminal(&mut h.rx).await;
        assert!(output_text(&first).contains("first"));
        h.session.wait_until_finished().await;

        h.session.set_command("echo second");
        assert!(h.session.execute());
        let second = until_terminal(&mut h.rx).await;
        assert!(matches!(second[0], Event::Started { .. }));
        assert!(output_text(&second).contains("$ echo second\n"));
        assert_eq!(second.last(), Some(&Event::Completed { returncode: 0 }));
    }

    #[tokio::test]
    async fn working_directory_is_applied() {
        let mut h = harness("pwd");
        h.session.execute();

        let events = until_terminal(&mut h.rx).await;
        let expected = h.dir.path().canonicalize().expect("canonical temp dir");
        assert!(
            output_text(&events).contains(&*expected.to_string_lossy()),
            "{events:?}"
        );
    }

    #[tokio::test]
    async fn missing_working_directory_reports_error() {
        let mut h = harness("echo unreachable");
        let missing = h.dir.path().join("missing");
        h.session.set_working_directory(&missing);
        h.session.execute();

        let events = until_terminal(&mut h.rx).await;
        assert_eq!(events.len(), 1, "{events:?}");
        match &events[0] {
            Event::Error { error } => assert!(error.contains("working directory"), "{error}"),
            other => panic!("expected error, got {other:?}"),
        }
        h.session.wait_until_finished().await;
        assert_eq!(h.session.state(), SessionState::Finished);
    }

    #[tokio::test]
    async fn missing_shell_reports_error() {
        let config = SupervisorConfig {
            shell: "/nonexistent/ptyctl-shell".into(),
            ..SupervisorConfig::default()
        };
        let mut h = harness_with("echo unreachable", config);
        h.session.execute();

        let events = until_terminal(&mut h.rx).await;
        assert!(
            !events.iter().any(|e| matches!(e, Event::Started { .. })),
            "{events:?}"
        );
        assert!(matches!(events.last(), Some(Event::Error { .. })));
    }

    #[tokio::test]
    async fn idle_timeout_stops_silent_command() {
        let config = SupervisorConfig {
            idle_timeout_secs: 1,
            kill_grace_secs: 1,
            ..supervisor_config(PumpStrategy::Auto)
        };
        let mut h = harness_with("sleep 30", config);
        h.session.execute();

        let events = until_terminal(&mut h.rx).await;
        match events.last() {
            Some(Event::Error { error }) => assert!(error.contains("idle timeout"), "{error}"),
            other => panic!("expected idle timeout error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn auto_run_executes_on_creation() {
        let dir = TempDir::new().expect("temp dir");
        let config = SessionConfig::new("echo auto")
            .with_working_directory(dir.path())
            .with_auto_run(true)
            .with_supervisor(supervisor_config(PumpStrategy::Auto));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let session = Session::new(config, Arc::new(tx), Handle::current());
        assert!(session.state().is_active());

        let events = until_terminal(&mut rx).await;
        assert!(output_text(&events).contains("auto"));
    }

    #[tokio::test]
    async fn json_messages_drive_the_session() {
        let mut h = harness("read line; echo \"[$line]\"");
        h.session
            .handle_message(r#"{"type":"execute"}"#)
            .expect("execute");
        wait_started(&mut h.rx).await;
        h.session
            .handle_message(r#"{"type":"input","data":"hi"}"#)
            .expect("input");

        let events = until_terminal(&mut h.rx).await;
        assert!(output_text(&events).contains("[hi]"));
    }

    #[tokio::test]
    async fn sessions_are_independent() {
        let mut long = harness("sleep 30");
        let mut short = harness("echo quick");
        long.session.execute();
        short.session.execute();

        let events = until_terminal(&mut short.rx).await;
        assert_eq!(events.last(), Some(&Event::Completed { returncode: 0 }));
        assert_eq!(long.session.state(), SessionState::Running);

        long.session.kill();
        let events = until_terminal(&mut long.rx).await;
        assert_eq!(events.last(), Some(&Event::Killed));
    }
}
