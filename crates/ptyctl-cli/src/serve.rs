//! `ptyctl serve`: one session driven over JSON lines.

use std::sync::Arc;

use anyhow::{Context, Result};
use ptyctl_core::{Session, SessionConfig, SupervisorConfig};
use ptyctl_proto::Event;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ServeArgs;

/// Reads commands from stdin until it closes, writing events to stdout.
///
/// Returns once stdin is closed and no execution is active. Ctrl-C kills the
/// running command first.
pub async fn serve(supervisor: SupervisorConfig, args: ServeArgs) -> Result<()> {
    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    let config = SessionConfig::new(args.command)
        .with_working_directory(args.cwd)
        .with_theme(args.theme)
        .with_auto_run(args.auto_run)
        .with_supervisor(supervisor);

    let writer = tokio::spawn(write_events(rx));
    let session = Session::new(config, Arc::new(tx), Handle::current());
    info!(theme = %args.theme, "Serving session on stdio");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from stdin")? else {
                    debug!("stdin closed");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if let Err(e) = session.handle_message(line) {
                    warn!(error = %e, "Rejected message");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping session");
                if session.state().is_active() {
                    session.kill();
                }
                break;
            }
        }
    }

    session.wait_until_finished().await;
    // The writer drains remaining events and ends once every sender is gone.
    drop(session);
    writer.await.context("Event writer panicked")?
}

async fn write_events(mut rx: mpsc::UnboundedReceiver<Event>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(event) = rx.recv().await {
        let mut line = event.encode();
        line.push('\n');
        stdout
            .write_all(line.as_bytes())
            .await
            .context("Failed to write event")?;
        stdout.flush().await.context("Failed to flush stdout")?;
    }
    Ok(())
}
