//! SessionRegistry - creates, tracks and destroys shell sessions.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        mpsc::Receiver,
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use tokio::sync::broadcast;

use super::activity::SessionActivity;
use super::error::{validate_size, SessionError};
use super::pty::{PtyEvent, PtySession, PtySpawnConfig};
use super::state::{Session, SessionExit, SessionId};
use crate::assistant::{ContextAssembler, ContextSnapshot};
use crate::event_bus::{EventBus, SessionEvent};
use crate::logging::{log_line, open_log_file, LogHandle};
use crate::sync::lock;

/// Per-call options for [`SessionRegistry::create`]. Unset fields fall back
/// to the registry's [`RegistrySettings`].
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub shell: Option<String>,
    pub args: Option<Vec<String>>,
    pub working_directory: Option<String>,
    pub environment: HashMap<String, String>,
    pub columns: Option<u16>,
    pub rows: Option<u16>,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = Some(args);
        self
    }

    pub fn working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn size(mut self, columns: u16, rows: u16) -> Self {
        self.columns = Some(columns);
        self.rows = Some(rows);
        self
    }
}

/// Registry-wide defaults and limits.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub default_shell: String,
    pub default_args: Vec<String>,
    pub default_working_directory: String,
    pub default_environment: HashMap<String, String>,
    pub default_columns: u16,
    pub default_rows: u16,
    /// How long destroy waits after SIGHUP before force-killing.
    pub destroy_grace: Duration,
    /// Bytes of recent output retained per session.
    pub output_buffer_bytes: usize,
    /// Submitted commands retained per session.
    pub command_history_len: usize,
    pub assembler: ContextAssembler,
    pub transcript_dir: Option<PathBuf>,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            default_shell: default_shell(),
            default_args: Vec::new(),
            default_working_directory: default_working_directory(),
            default_environment: HashMap::new(),
            default_columns: 80,
            default_rows: 24,
            destroy_grace: Duration::from_secs(2),
            output_buffer_bytes: 64 * 1024,
            command_history_len: 100,
            assembler: ContextAssembler::default(),
            transcript_dir: None,
        }
    }
}

impl RegistrySettings {
    fn spawn_config(&self, options: SessionOptions) -> PtySpawnConfig {
        let mut env = self.default_environment.clone();
        env.extend(options.environment);
        // Default args belong to the default shell only.
        let args = match (&options.shell, options.args) {
            (_, Some(args)) => args,
            (Some(_), None) => Vec::new(),
            (None, None) => self.default_args.clone(),
        };
        PtySpawnConfig {
            shell: options.shell.unwrap_or_else(|| self.default_shell.clone()),
            args,
            cwd: options
                .working_directory
                .unwrap_or_else(|| self.default_working_directory.clone()),
            env,
            cols: options.columns.unwrap_or(self.default_columns),
            rows: options.rows.unwrap_or(self.default_rows),
        }
    }
}

/// `$SHELL`, falling back to `/bin/sh`.
pub fn default_shell() -> String {
    std::env::var("SHELL")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/bin/sh".to_string())
}

/// `$HOME`, falling back to `/`.
pub fn default_working_directory() -> String {
    std::env::var("HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "/".to_string())
}

/// Holds the pty, the lifecycle record and the recorded activity for one
/// session.
struct SessionEntry {
    info: Mutex<Session>,
    pty: PtySession,
    activity: Mutex<SessionActivity>,
    transcript: LogHandle,
}

impl SessionEntry {
    fn snapshot(&self) -> Session {
        lock(&self.info).clone()
    }
}

/// Manages every live shell session.
///
/// Thread-safe: the id-to-session map is only locked long enough to look up
/// or remove an entry, and all process I/O happens on the entry itself, so
/// operations on different sessions never wait for each other.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<SessionEntry>>>,
    next_id: AtomicU64,
    event_bus: Arc<EventBus>,
    settings: RegistrySettings,
}

impl SessionRegistry {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self::with_settings(event_bus, RegistrySettings::default())
    }

    pub fn with_settings(event_bus: Arc<EventBus>, settings: RegistrySettings) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            event_bus,
            settings,
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Start a new shell session.
    ///
    /// The process is spawned before this returns, so the session is already
    /// `Running` and accepts writes and resizes immediately. Output is
    /// published on the event bus as `session:data:<id>`.
    pub fn create(&self, options: SessionOptions) -> Result<SessionId, SessionError> {
        let id = SessionId::from_sequence(self.next_id.fetch_add(1, Ordering::SeqCst));
        let config = self.settings.spawn_config(options);

        let mut info = Session::starting(
            id.clone(),
            config.shell.clone(),
            config.args.clone(),
            config.cwd.clone(),
            config.env.clone(),
            config.cols,
            config.rows,
        );

        let (pty, receiver) = PtySession::spawn(&config).map_err(|e| {
            log::warn!("Session {} failed to start: {}", id, e);
            e
        })?;
        info.mark_running(pty.pid());

        let entry = Arc::new(SessionEntry {
            info: Mutex::new(info),
            pty,
            activity: Mutex::new(SessionActivity::new(
                self.settings.output_buffer_bytes,
                self.settings.command_history_len,
            )),
            transcript: open_log_file(self.settings.transcript_dir.as_deref(), id.as_str()),
        });

        lock(&self.sessions).insert(id.clone(), Arc::clone(&entry));
        self.event_bus.emit(SessionEvent::Created {
            session_id: id.clone(),
        });

        let forward_id = id.clone();
        let event_bus = Arc::clone(&self.event_bus);
        thread::spawn(move || forward_events(forward_id, entry, receiver, event_bus));

        log::debug!("Created session {} ({})", id, config.shell);
        Ok(id)
    }

    /// Snapshot of one session.
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.entry(id).map(|entry| entry.snapshot())
    }

    /// Tear a session down.
    ///
    /// Returns `true` if the session existed, `false` if the id is unknown
    /// or was already destroyed. Never fails.
    pub fn destroy(&self, id: &SessionId) -> bool {
        // Removal is the serialization point: only one caller gets the entry.
        let Some(entry) = lock(&self.sessions).remove(id) else {
            return false;
        };

        entry.pty.destroy(self.settings.destroy_grace);
        self.event_bus.emit(SessionEvent::Destroyed {
            session_id: id.clone(),
        });
        log::debug!("Destroyed session {}", id);
        true
    }

    /// Snapshots of every tracked session, oldest first.
    pub fn list_all(&self) -> Vec<Session> {
        let entries: Vec<Arc<SessionEntry>> = lock(&self.sessions).values().cloned().collect();
        let mut sessions: Vec<Session> = entries.iter().map(|entry| entry.snapshot()).collect();
        sessions.sort_by_key(|session| session.id.sequence());
        sessions
    }

    /// Forward raw input to a session.
    ///
    /// Fails only for unknown ids; writing to an exited session is a no-op.
    pub fn write(&self, id: &SessionId, data: &[u8]) -> Result<(), SessionError> {
        let entry = self.require(id)?;
        lock(&entry.activity).commands.feed(data);
        log_line(&entry.transcript, "STDIN", &String::from_utf8_lossy(data));
        entry.pty.write(data)
    }

    /// Change a session's terminal size. The last resize wins.
    pub fn resize(&self, id: &SessionId, columns: u16, rows: u16) -> Result<(), SessionError> {
        validate_size(columns, rows)?;
        let entry = self.require(id)?;

        // Held across the pty call so concurrent resizes apply in the same
        // order they are recorded.
        let mut info = lock(&entry.info);
        if info.is_exited() {
            return Ok(());
        }
        entry.pty.resize(columns, rows)?;
        info.columns = columns;
        info.rows = rows;
        Ok(())
    }

    /// Record the text currently selected in the session's view.
    pub fn set_selection(&self, id: &SessionId, text: Option<String>) -> Result<(), SessionError> {
        let entry = self.require(id)?;
        lock(&entry.activity).selection = text;
        Ok(())
    }

    /// Assemble a bounded context snapshot from a session's recorded state.
    pub fn context_snapshot(&self, id: &SessionId) -> Option<ContextSnapshot> {
        let entry = self.entry(id)?;
        let working_directory = lock(&entry.info).working_directory.clone();
        let observation = lock(&entry.activity).observe(&working_directory);
        Some(self.settings.assembler.assemble(&observation))
    }

    /// Subscribe to events from every session.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_bus.subscribe()
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy every session.
    pub fn shutdown(&self) {
        let ids: Vec<SessionId> = lock(&self.sessions).keys().cloned().collect();
        for id in ids {
            self.destroy(&id);
        }
    }

    fn entry(&self, id: &SessionId) -> Option<Arc<SessionEntry>> {
        lock(&self.sessions).get(id).cloned()
    }

    fn require(&self, id: &SessionId) -> Result<Arc<SessionEntry>, SessionError> {
        self.entry(id)
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Record pty output and republish it on the event bus until the process
/// exits.
fn forward_events(
    id: SessionId,
    entry: Arc<SessionEntry>,
    receiver: Receiver<PtyEvent>,
    event_bus: Arc<EventBus>,
) {
    for event in receiver {
        match event {
            PtyEvent::Data(data) => {
                lock(&entry.activity).output.push(&data);
                log_line(&entry.transcript, "STDOUT", &String::from_utf8_lossy(&data));
                event_bus.emit(SessionEvent::Data {
                    session_id: id.clone(),
                    data,
                });
            }
            PtyEvent::Exit(exit) => {
                finish(&id, &entry, exit, &event_bus);
                return;
            }
        }
    }

    // Channel closed without an Exit event.
    finish(&id, &entry, SessionExit::default(), &event_bus);
}

fn finish(id: &SessionId, entry: &SessionEntry, exit: SessionExit, event_bus: &EventBus) {
    lock(&entry.info).mark_exited(&exit);
    log_line(
        &entry.transcript,
        "EXIT",
        &format!("code={:?} signal={:?}", exit.code, exit.signal),
    );
    log::debug!("Session {} exited: {:?}", id, exit);
    event_bus.emit(SessionEvent::Exit {
        session_id: id.clone(),
        exit,
    });
}
