//! PTY (pseudo-terminal) backed shell process.
//!
//! A [`PtySession`] owns exactly one child process attached to a pty. Output
//! is read on a background thread and delivered, in arrival order, through a
//! bounded channel of [`PtyEvent`]s. When the channel is full the reader stops
//! reading, so the kernel pty buffer throttles the shell instead of output
//! being dropped.
//!
//! Exit is detected by reaping the child on a separate waiter thread, not by
//! EOF on the pty: a background job can keep the pty open long after the
//! shell itself is gone.

use portable_pty::{native_pty_system, Child, CommandBuilder, ExitStatus, MasterPty, PtySize};
use std::{
    collections::HashMap,
    io::{self, Read, Write},
    path::Path,
    sync::{
        mpsc::{self, Receiver, Sender, SyncSender},
        Arc, Mutex,
    },
    thread,
    time::{Duration, Instant},
};

use super::error::{validate_size, SessionError};
use super::state::SessionExit;
use crate::sync::lock;

/// Capacity of the per-session output channel, in chunks.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Largest chunk handed to the channel in a single `Data` event.
const READ_CHUNK_SIZE: usize = 4096;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long the waiter lets the reader drain output after the process is
/// reaped before reporting the exit.
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

type SharedChild = Arc<Mutex<Box<dyn Child + Send + Sync>>>;

/// Set exactly once, by the waiter thread, when the process is reaped.
type ExitSlot = Arc<Mutex<Option<SessionExit>>>;

/// Output of a pty session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PtyEvent {
    /// A chunk of raw process output. Chunks may split lines or UTF-8
    /// sequences.
    Data(Vec<u8>),
    /// The process exited. Always the last event a consumer needs to read.
    Exit(SessionExit),
}

/// Configuration for spawning a pty session.
#[derive(Debug, Clone)]
pub struct PtySpawnConfig {
    pub shell: String,
    pub args: Vec<String>,
    pub cwd: String,
    /// Overlaid on the parent environment.
    pub env: HashMap<String, String>,
    pub cols: u16,
    pub rows: u16,
}

/// A running shell attached to a pseudo-terminal.
pub struct PtySession {
    /// Must stay alive until destroy, dropping it closes the pty.
    master: Mutex<Option<Box<dyn MasterPty + Send>>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    child: SharedChild,
    status: ExitSlot,
    pid: Option<u32>,
}

impl PtySession {
    /// Spawn `config.shell` on a fresh pty. Returns the session and the
    /// receiving end of its event channel.
    ///
    /// Launch failures (missing executable, missing working directory,
    /// permission denied) are returned here, before any event is produced.
    pub fn spawn(config: &PtySpawnConfig) -> Result<(Self, Receiver<PtyEvent>), SessionError> {
        validate_size(config.cols, config.rows)?;

        if !Path::new(&config.cwd).is_dir() {
            return Err(SessionError::Spawn(format!(
                "Working directory does not exist: {}",
                config.cwd
            )));
        }

        let pair = native_pty_system()
            .openpty(pty_size(config.cols, config.rows))
            .map_err(|e| SessionError::Spawn(format!("Failed to open PTY: {}", e)))?;

        let mut cmd = CommandBuilder::new(&config.shell);
        cmd.args(&config.args);
        cmd.cwd(&config.cwd);
        cmd.env("TERM", "xterm-256color");
        for (key, value) in &config.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SessionError::Spawn(format!("Failed to spawn {}: {}", config.shell, e)))?;

        // Only the child (and whatever it forks) keeps the slave side open.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SessionError::Spawn(format!("Failed to clone reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SessionError::Spawn(format!("Failed to take writer: {}", e)))?;

        let pid = child.process_id();
        let child: SharedChild = Arc::new(Mutex::new(child));
        let status: ExitSlot = Arc::new(Mutex::new(None));
        let (tx, rx) = mpsc::sync_channel(EVENT_CHANNEL_CAPACITY);
        let (reader_done, reader_finished) = mpsc::channel();

        let reader_tx = tx.clone();
        thread::spawn(move || read_loop(reader, reader_tx, reader_done));

        let waiter_child = Arc::clone(&child);
        let waiter_status = Arc::clone(&status);
        thread::spawn(move || wait_loop(waiter_child, pid, waiter_status, reader_finished, tx));

        log::debug!("Spawned {} (pid {:?}) in {}", config.shell, pid, config.cwd);

        let session = Self {
            master: Mutex::new(Some(pair.master)),
            writer: Mutex::new(Some(writer)),
            child,
            status,
            pid,
        };
        Ok((session, rx))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True once the process has been reaped.
    pub fn has_exited(&self) -> bool {
        lock(&self.status).is_some()
    }

    pub fn is_running(&self) -> bool {
        !self.has_exited() && lock(&self.writer).is_some()
    }

    /// Forward raw bytes to the process. A no-op once the process has
    /// exited or the session was destroyed.
    pub fn write(&self, data: &[u8]) -> Result<(), SessionError> {
        if self.has_exited() {
            return Ok(());
        }

        let mut guard = lock(&self.writer);
        let Some(writer) = guard.as_mut() else {
            return Ok(());
        };

        match writer.write_all(data).and_then(|()| writer.flush()) {
            Ok(()) => Ok(()),
            // The process went away between the check and the write.
            Err(_) if self.has_exited() => Ok(()),
            Err(e) => Err(SessionError::Io(format!("Write failed: {}", e))),
        }
    }

    /// Propagate new dimensions to the pty. A no-op once the process has
    /// exited.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        validate_size(cols, rows)?;
        if self.has_exited() {
            return Ok(());
        }

        let guard = lock(&self.master);
        let Some(master) = guard.as_ref() else {
            return Ok(());
        };

        master
            .resize(pty_size(cols, rows))
            .map_err(|e| SessionError::Io(format!("Resize failed: {}", e)))
    }

    /// Terminate the process and release the pty.
    ///
    /// Sends SIGHUP to the shell's process group, waits up to `grace` for
    /// the shell to exit, then kills the group. Calling this more than once
    /// is a no-op.
    pub fn destroy(&self, grace: Duration) {
        // Closing the input side first lets a well-behaved shell see EOF.
        let had_writer = lock(&self.writer).take().is_some();

        if had_writer && !self.has_exited() {
            self.terminate(grace);
        }

        lock(&self.master).take();
    }

    fn terminate(&self, grace: Duration) {
        #[cfg(unix)]
        {
            if self.signal_group(libc::SIGHUP) && self.wait_for_exit(grace) {
                return;
            }
            if self.signal_group(libc::SIGKILL) {
                log::debug!("Process {:?} outlived SIGHUP, killed its group", self.pid);
                return;
            }
        }
        #[cfg(not(unix))]
        let _ = grace;

        let status = lock(&self.status);
        if status.is_none() {
            if let Err(e) = lock(&self.child).kill() {
                log::warn!("Failed to kill process {:?}: {}", self.pid, e);
            }
        }
    }

    /// Deliver `signal` to the shell's process group if the shell has not
    /// been reaped yet. The status lock is held across the check so the pid
    /// cannot be recycled in between.
    #[cfg(unix)]
    fn signal_group(&self, signal: libc::c_int) -> bool {
        let Some(pid) = self.pid else {
            return false;
        };
        let status = lock(&self.status);
        if status.is_some() {
            return false;
        }

        let pid = pid as libc::pid_t;
        // The shell leads its own session, so its pid is also its group id.
        unsafe {
            if libc::killpg(pid, signal) != 0 {
                libc::kill(pid, signal);
            }
        }
        true
    }

    #[cfg(unix)]
    fn wait_for_exit(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.has_exited() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        self.destroy(Duration::ZERO);
    }
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}

/// Pump output into the channel until EOF. `_done` is dropped on return,
/// which tells the waiter the output is drained.
fn read_loop(mut reader: Box<dyn Read + Send>, tx: SyncSender<PtyEvent>, _done: Sender<()>) {
    let mut buf = [0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(PtyEvent::Data(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            // Linux reports EIO once the slave side is closed.
            Err(_) => break,
        }
    }
}

/// Reap the child, give the reader a moment to flush what the process wrote
/// last, then report the exit.
fn wait_loop(
    child: SharedChild,
    pid: Option<u32>,
    status: ExitSlot,
    reader_finished: Receiver<()>,
    tx: SyncSender<PtyEvent>,
) {
    let exit = loop {
        {
            let mut slot = lock(&status);
            if let Some(exit) = poll_exit(&child, pid) {
                *slot = Some(exit.clone());
                break exit;
            }
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    };

    // Returns early on disconnect, i.e. as soon as the reader hits EOF.
    let _ = reader_finished.recv_timeout(EXIT_DRAIN_TIMEOUT);
    let _ = tx.send(PtyEvent::Exit(exit));
}

fn poll_exit(child: &SharedChild, pid: Option<u32>) -> Option<SessionExit> {
    #[cfg(unix)]
    {
        if let Some(pid) = pid {
            return reap(pid);
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    match lock(child).try_wait() {
        Ok(Some(status)) => Some(exit_from_status(&status)),
        Ok(None) => None,
        Err(e) => {
            log::warn!("Failed to collect exit status: {}", e);
            Some(SessionExit::default())
        }
    }
}

/// Non-blocking `waitpid`, decoding both exit codes and terminating
/// signals.
#[cfg(unix)]
fn reap(pid: u32) -> Option<SessionExit> {
    let mut raw: libc::c_int = 0;
    let rc = unsafe { libc::waitpid(pid as libc::pid_t, &mut raw, libc::WNOHANG) };
    match rc {
        0 => None,
        -1 => {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return None;
            }
            log::warn!("Failed to collect exit status of {}: {}", pid, err);
            Some(SessionExit::default())
        }
        _ if libc::WIFSIGNALED(raw) => Some(SessionExit {
            code: None,
            signal: Some(signal_name(libc::WTERMSIG(raw))),
        }),
        _ if libc::WIFEXITED(raw) => Some(SessionExit {
            code: Some(libc::WEXITSTATUS(raw) as u32),
            signal: None,
        }),
        _ => None,
    }
}

#[cfg(unix)]
fn signal_name(signal: libc::c_int) -> String {
    let name = match signal {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGABRT => "SIGABRT",
        libc::SIGKILL => "SIGKILL",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGTERM => "SIGTERM",
        other => return format!("signal {}", other),
    };
    name.to_string()
}

fn exit_from_status(status: &ExitStatus) -> SessionExit {
    SessionExit {
        code: Some(status.exit_code()),
        signal: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_config() -> PtySpawnConfig {
        PtySpawnConfig {
            shell: "/bin/sh".to_string(),
            args: vec![],
            cwd: std::env::temp_dir().to_string_lossy().into_owned(),
            env: HashMap::new(),
            cols: 80,
            rows: 24,
        }
    }

    /// Drain events until exit, failing the test after `timeout`.
    fn drain(rx: &Receiver<PtyEvent>, timeout: Duration) -> (Vec<u8>, SessionExit) {
        let deadline = Instant::now() + timeout;
        let mut output = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(PtyEvent::Data(data)) => output.extend_from_slice(&data),
                Ok(PtyEvent::Exit(exit)) => return (output, exit),
                Err(e) => panic!("no exit event: {:?}, output so far: {:?}", e, output),
            }
        }
    }

    /// Read output until `needle` shows up.
    fn wait_for_output(rx: &Receiver<PtyEvent>, needle: &str) {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut seen = Vec::new();
        while !String::from_utf8_lossy(&seen).contains(needle) {
            match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok(PtyEvent::Data(data)) => seen.extend_from_slice(&data),
                other => panic!("unexpected {:?}", other),
            }
        }
    }

    #[test]
    fn exit_from_status_with_code() {
        let exit = exit_from_status(&ExitStatus::with_exit_code(3));
        assert_eq!(exit.code, Some(3));
        assert!(exit.signal.is_none());
    }

    #[test]
    fn spawn_rejects_missing_working_directory() {
        let mut config = sh_config();
        config.cwd = "/definitely/not/a/real/dir".to_string();
        let result = PtySession::spawn(&config);
        assert!(matches!(result, Err(SessionError::Spawn(_))));
    }

    #[test]
    fn spawn_rejects_zero_size() {
        let mut config = sh_config();
        config.cols = 0;
        let result = PtySession::spawn(&config);
        assert!(matches!(result, Err(SessionError::InvalidSize { .. })));
    }

    #[test]
    #[cfg(unix)]
    fn spawn_rejects_missing_executable() {
        let mut config = sh_config();
        config.shell = "/definitely/not/a/real/shell".to_string();
        let result = PtySession::spawn(&config);
        assert!(matches!(result, Err(SessionError::Spawn(_))));
    }

    #[test]
    #[cfg(unix)]
    fn shell_exit_code_is_reported() {
        let (session, rx) = PtySession::spawn(&sh_config()).unwrap();

        session.write(b"exit 7\n").unwrap();
        let (_, exit) = drain(&rx, Duration::from_secs(10));

        assert_eq!(exit.code, Some(7));
        assert!(session.has_exited());
        assert!(!session.is_running());
    }

    #[test]
    #[cfg(unix)]
    fn write_and_resize_after_exit_are_noops() {
        let (session, rx) = PtySession::spawn(&sh_config()).unwrap();
        session.write(b"exit\n").unwrap();
        drain(&rx, Duration::from_secs(10));

        assert!(session.write(b"echo late\n").is_ok());
        assert!(session.resize(100, 30).is_ok());
    }

    #[test]
    #[cfg(unix)]
    fn destroy_is_idempotent_and_ends_stream() {
        let (session, rx) = PtySession::spawn(&sh_config()).unwrap();

        session.destroy(Duration::from_millis(500));
        session.destroy(Duration::from_millis(500));

        drain(&rx, Duration::from_secs(10));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert!(session.write(b"echo nope\n").is_ok());
    }

    #[test]
    #[cfg(unix)]
    fn destroy_escalates_when_hangup_is_ignored() {
        let (session, rx) = PtySession::spawn(&sh_config()).unwrap();

        session
            .write(b"trap '' HUP; echo trapped; exec sleep 30\n")
            .unwrap();
        wait_for_output(&rx, "trapped\r\n");

        let started = Instant::now();
        session.destroy(Duration::from_millis(200));
        let (_, exit) = drain(&rx, Duration::from_secs(10));

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(exit.signal.as_deref(), Some("SIGKILL"));
        assert_eq!(exit.code, None);
    }

    #[test]
    #[cfg(unix)]
    fn exit_is_reported_while_background_job_holds_pty() {
        let (session, rx) = PtySession::spawn(&sh_config()).unwrap();

        let started = Instant::now();
        session.write(b"sleep 5 &\nexit 4\n").unwrap();
        let (_, exit) = drain(&rx, Duration::from_secs(4));

        assert_eq!(exit.code, Some(4));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(session.has_exited());
    }

    #[test]
    #[cfg(unix)]
    fn destroy_reports_exit_while_background_job_holds_pty() {
        let (session, rx) = PtySession::spawn(&sh_config()).unwrap();
        session.write(b"sleep 5 &\necho bg-$((1 + 1))\n").unwrap();
        wait_for_output(&rx, "bg-2\r\n");

        session.destroy(Duration::from_millis(200));
        let (_, exit) = drain(&rx, Duration::from_secs(3));

        assert!(exit.code.is_some() || exit.signal.is_some());
        assert!(session.has_exited());
    }

    #[test]
    #[cfg(unix)]
    fn signal_names_are_readable() {
        assert_eq!(signal_name(libc::SIGHUP), "SIGHUP");
        assert_eq!(signal_name(libc::SIGKILL), "SIGKILL");
    }
}
