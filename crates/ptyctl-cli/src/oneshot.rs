//! `ptyctl run`: execute once and mirror the command's exit status.

use std::sync::Arc;

use anyhow::{Context, Result};
use ptyctl_core::{Session, SessionConfig, SupervisorConfig};
use ptyctl_proto::Event;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::RunArgs;

/// Exit status after a `terminated` event (128 + SIGINT, as shells report it).
const EXIT_TERMINATED: i32 = 130;
/// Exit status after a `killed` event (128 + SIGKILL).
const EXIT_KILLED: i32 = 137;

/// Streams output to stdout and returns the process exit status to use.
///
/// Stdin lines are forwarded as input once the command has started. The
/// first Ctrl-C terminates the command, a second one kills it.
pub async fn run(supervisor: SupervisorConfig, args: RunArgs) -> Result<i32> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    let config = SessionConfig::new(args.command)
        .with_working_directory(args.cwd)
        .with_supervisor(supervisor);
    let session = Arc::new(Session::new(config, Arc::new(tx), Handle::current()));
    session.execute();

    let mut stdout = tokio::io::stdout();
    let mut stdin_task = None;
    let mut interrupts = 0u32;

    let code = loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    break 1;
                };
                match event {
                    Event::Started { pid, .. } => {
                        debug!(pid, "Command started");
                        stdin_task = Some(tokio::spawn(forward_stdin(Arc::clone(&session))));
                    }
                    Event::Output { data } => {
                        stdout.write_all(data.as_bytes()).await.context("Failed to write output")?;
                        stdout.flush().await.context("Failed to flush stdout")?;
                    }
                    Event::InputSent { .. } | Event::NotRunning => {}
                    terminal => {
                        if let Event::Error { error } = &terminal {
                            eprintln!("ptyctl: {error}");
                        }
                        break exit_code(&terminal).unwrap_or(1);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                interrupts += 1;
                if interrupts == 1 {
                    info!("Interrupted, terminating command");
                    session.terminate();
                } else {
                    info!("Interrupted again, killing command");
                    session.kill();
                }
            }
        }
    };

    if let Some(task) = stdin_task {
        task.abort();
    }
    Ok(code)
}

async fn forward_stdin(session: Arc<Session>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => session.send_input(&line),
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Stopped forwarding stdin");
                break;
            }
        }
    }
}

/// The exit status a terminal event maps to.
fn exit_code(event: &Event) -> Option<i32> {
    match event {
        Event::Completed { returncode } => Some(*returncode),
        Event::Terminated => Some(EXIT_TERMINATED),
        Event::Killed => Some(EXIT_KILLED),
        Event::Error { .. } => Some(1),
        _ => None,
    }
}
