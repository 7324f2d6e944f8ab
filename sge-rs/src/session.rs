//! Gameplay session on top of a [`Transport`].
//!
//! [`GameSession::connect`] spawns one task that owns the transport and
//! bridges it to the rest of the program through channels:
//!
//! ```text
//!   send() ──► commands (mpsc) ──► session_task ──► Transport ──► socket
//!                                      │
//!   subscribe() ◄── events (broadcast) ◄┘  Hello / Text / Echo / Error / Quit
//! ```
//!
//! All socket reads happen in that one task, so protocol state never sees
//! two readers.

use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::sal::SessionDescriptor;
use crate::transport::{
    DelimitMode, Transport, TransportConfig, TransportError, TransportEvent, TransportState,
};

const EVENT_CAPACITY: usize = 1024;

// ── FrontEnd ──────────────────────────────────────────────────────────────────

/// Which client the session identifies itself as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrontEnd {
    #[default]
    Stormfront,
    Wizard,
}

impl FrontEnd {
    pub fn name(self) -> &'static str {
        match self {
            FrontEnd::Stormfront => "STORMFRONT",
            FrontEnd::Wizard => "WIZARD",
        }
    }

    fn version(self) -> &'static str {
        match self {
            FrontEnd::Stormfront => "1.0.1.26",
            FrontEnd::Wizard => "1.0.1.22",
        }
    }

    /// Identification line sent right after the session key.
    pub fn hello(self) -> String {
        format!("/FE:{} /VERSION:{} /P:{} /XML", self.name(), self.version(), platform_tag())
    }
}

impl FromStr for FrontEnd {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "stormfront" | "storm" | "sf" => Ok(FrontEnd::Stormfront),
            "wizard" | "wiz" => Ok(FrontEnd::Wizard),
            other => Err(format!("unknown front end: {other}")),
        }
    }
}

fn platform_tag() -> &'static str {
    match std::env::consts::OS {
        "windows" => "WIN_XP",
        "macos" => "OSX",
        _ => "UNIX",
    }
}

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connected; key and identification sent.
    Hello,
    /// Server output, in arrival order.
    Text(String),
    /// A command this client sent with `echo` set.
    Echo(String),
    Error(String),
    /// The connection is gone.
    Quit,
}

enum Command {
    Send { line: String, echo: bool },
    Quit,
}

// ── GameSession ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub front_end: FrontEnd,
    /// Delimiting mode entered on the game-mode sentinel.
    pub game_mode: DelimitMode,
    /// File used by [`GameSession::toggle_logging`] when none is given.
    pub log_path: Option<PathBuf>,
}

type LogFile = Arc<Mutex<Option<File>>>;

pub struct GameSession {
    options: SessionOptions,
    commands: mpsc::UnboundedSender<Command>,
    /// Taken by the first `connect`.
    command_rx: StdMutex<Option<mpsc::UnboundedReceiver<Command>>>,
    events: broadcast::Sender<SessionEvent>,
    log: LogFile,
}

impl GameSession {
    /// A session that is not connected yet.  Subscribe before connecting to
    /// see the `Hello` event.
    pub fn new(options: SessionOptions) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            options,
            commands,
            command_rx: StdMutex::new(Some(command_rx)),
            events,
            log: Arc::new(Mutex::new(None)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Open the gameplay connection described by `sal`.
    ///
    /// Commands sent before this call are written once the socket is up.
    pub fn connect(&self, sal: &SessionDescriptor) {
        let taken = self.command_rx.lock().ok().and_then(|mut rx| rx.take());
        let Some(commands) = taken else {
            let _ = self.events.send(SessionEvent::Error(
                TransportError::InvalidState(TransportState::Connected).to_string(),
            ));
            return;
        };

        info!(host = %sal.game_host, port = sal.game_port, "opening game session");
        let transport = Transport::new(TransportConfig {
            host: sal.game_host.clone(),
            port: sal.game_port,
            key: sal.key.clone(),
            game_mode: self.options.game_mode,
        });
        tokio::spawn(session_task(
            transport,
            commands,
            self.events.clone(),
            self.log.clone(),
            self.options.front_end.hello(),
        ));
    }

    /// Send `command` followed by a newline.  Returns `false` once the
    /// session has ended.
    pub fn send(&self, command: &str, echo: bool) -> bool {
        self.commands
            .send(Command::Send { line: format!("{command}\n"), echo })
            .is_ok()
    }

    /// Close the connection; subscribers see `Quit`.
    pub fn quit(&self) -> bool {
        self.commands.send(Command::Quit).is_ok()
    }

    /// Start or stop the transcript log.  Returns whether logging is now on.
    ///
    /// `path` overrides [`SessionOptions::log_path`] when starting.
    pub async fn toggle_logging(&self, path: Option<&Path>) -> io::Result<bool> {
        let mut log = self.log.lock().await;
        if let Some(mut file) = log.take() {
            file.flush().await?;
            info!("session logging stopped");
            return Ok(false);
        }
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| self.options.log_path.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no log file configured"))?;
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        info!(path = %path.display(), "session logging started");
        *log = Some(file);
        Ok(true)
    }

    pub async fn is_logging(&self) -> bool {
        self.log.lock().await.is_some()
    }
}

impl Drop for GameSession {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Quit);
    }
}

// ── Session task ──────────────────────────────────────────────────────────────

async fn append_log(log: &LogFile, text: &str) {
    if let Some(file) = log.lock().await.as_mut() {
        if let Err(e) = file.write_all(text.as_bytes()).await {
            warn!("session log write failed: {e}");
        }
    }
}

struct TaskCtx {
    events: broadcast::Sender<SessionEvent>,
    log: LogFile,
    hello: String,
}

impl TaskCtx {
    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Handle one transport event; returns `false` when the session is over.
    async fn on_transport(&self, transport: &mut Transport, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Connect => {
                let hello = format!("{}\n", self.hello);
                for ev in transport.write(hello.as_bytes()).await {
                    if let TransportEvent::Error(e) = ev {
                        self.emit(SessionEvent::Error(e.to_string()));
                        return false;
                    }
                }
                debug!("client identification sent");
                self.emit(SessionEvent::Hello);
                true
            }
            TransportEvent::Line(line) => {
                let text = format!("{line}{}", transport.mode().line_ending());
                append_log(&self.log, &text).await;
                self.emit(SessionEvent::Text(text));
                true
            }
            TransportEvent::Text(text) => {
                append_log(&self.log, &text).await;
                self.emit(SessionEvent::Text(text));
                true
            }
            TransportEvent::Error(e) => {
                warn!("game session error: {e}");
                self.emit(SessionEvent::Error(e.to_string()));
                !matches!(transport.state(), TransportState::Closed | TransportState::Error)
            }
            TransportEvent::Close => {
                info!("game session closed");
                self.emit(SessionEvent::Quit);
                false
            }
        }
    }

    async fn on_events(&self, transport: &mut Transport, events: Vec<TransportEvent>) -> bool {
        for event in events {
            if !self.on_transport(transport, event).await {
                return false;
            }
        }
        true
    }
}

async fn session_task(
    mut transport: Transport,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<SessionEvent>,
    log: LogFile,
    hello: String,
) {
    let ctx = TaskCtx { events, log, hello };

    let connected = transport.connect().await;
    if !ctx.on_events(&mut transport, connected).await {
        return;
    }

    loop {
        tokio::select! {
            received = transport.recv() => {
                if !ctx.on_events(&mut transport, received).await {
                    return;
                }
            }
            command = commands.recv() => match command {
                Some(Command::Send { line, echo }) => {
                    let written = transport.write(line.as_bytes()).await;
                    append_log(&ctx.log, &line).await;
                    if echo {
                        ctx.emit(SessionEvent::Echo(line.trim_end_matches('\n').to_owned()));
                    }
                    if !ctx.on_events(&mut transport, written).await {
                        return;
                    }
                }
                Some(Command::Quit) | None => {
                    let closed = transport.close().await;
                    ctx.on_events(&mut transport, closed).await;
                    return;
                }
            },
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
