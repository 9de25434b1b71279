use aiterm_core::session::SessionExit;
use aiterm_core::{AppContext, SessionEvent, SessionId, SessionOptions};
use anyhow::Result;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Sender};
use std::thread;
use tokio::sync::broadcast::{self, error::RecvError};

use super::print_stream;

/// Prefix that sends a stdin line to the assistant instead of the shell.
const ASK_PREFIX: &str = "??";

enum Input {
    Line(String),
    Eof,
    Exited(SessionExit),
}

pub fn run(ctx: &AppContext, shell: Option<String>, cwd: Option<String>) -> Result<()> {
    // Subscribe before creating so no early output is missed.
    let events = ctx.registry.subscribe();

    let mut options = SessionOptions::new();
    if let Some(shell) = shell {
        options = options.shell(shell);
    }
    if let Some(cwd) = cwd {
        options = options.working_directory(cwd);
    }
    let id = ctx.registry.create(options)?;
    log::info!("Started session {} (type `{} question` to ask the assistant)", id, ASK_PREFIX);

    let bootstrap_ctx = ctx.clone();
    thread::spawn(move || {
        bootstrap_ctx.bootstrap();
    });

    let (tx, inputs) = mpsc::channel();
    spawn_output_pump(events, id.clone(), tx.clone());
    spawn_stdin_reader(tx);

    while let Ok(input) = inputs.recv() {
        match input {
            Input::Line(line) => {
                if let Some(question) = line.strip_prefix(ASK_PREFIX) {
                    ask(ctx, &id, question.trim());
                    continue;
                }
                let mut data = line.into_bytes();
                data.push(b'\n');
                ctx.registry.write(&id, &data)?;
            }
            Input::Exited(exit) => {
                match (exit.code, exit.signal) {
                    (_, Some(signal)) => log::info!("Session {} killed by {}", id, signal),
                    (code, None) => log::info!("Session {} exited with {:?}", id, code),
                }
                break;
            }
            Input::Eof => break,
        }
    }

    ctx.registry.destroy(&id);
    Ok(())
}

fn ask(ctx: &AppContext, id: &SessionId, question: &str) {
    let snapshot = ctx.snapshot_for(id);
    let result = ctx
        .router
        .query_streaming(question, snapshot.as_ref(), None)
        .map_err(anyhow::Error::from)
        .and_then(print_stream);
    if let Err(e) = result {
        log::error!("Assistant query failed: {}", e);
    }
}

fn spawn_output_pump(
    mut events: broadcast::Receiver<SessionEvent>,
    id: SessionId,
    tx: Sender<Input>,
) {
    thread::spawn(move || {
        let mut stdout = io::stdout();
        loop {
            match events.blocking_recv() {
                Ok(SessionEvent::Data { session_id, data }) if session_id == id => {
                    let _ = stdout.write_all(&data);
                    let _ = stdout.flush();
                }
                Ok(SessionEvent::Exit { session_id, exit }) if session_id == id => {
                    let _ = tx.send(Input::Exited(exit));
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Output too fast; skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn spawn_stdin_reader(tx: Sender<Input>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(Input::Line(line)).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    log::warn!("stdin read failed: {}", e);
                    break;
                }
            }
        }
        let _ = tx.send(Input::Eof);
    });
}
