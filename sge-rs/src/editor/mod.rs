//! Script editor driven over a live game session.
//!
//! [`ScriptEditEngine`] runs one editor operation at a time.  Each operation
//! subscribes to the session's events, sends its opening command, and feeds
//! every inbound text chunk through a [`LineAccumulator`].  Completed lines go
//! to the operation's line hook; when the unterminated tail ends with the
//! `Edt:` prompt the tail is discarded and the prompt hook runs.  Any gap of
//! more than the configured timeout between inbound chunks fails the
//! operation with [`ScriptError::Timeout`].  Missed chunks fail it with
//! [`ScriptError::Lagged`], and the session quitting fails it with
//! [`ScriptError::SessionClosed`].
//!
//! The session must be in unbuffered mode (the server's `<mode id="CMD"/>`
//! sentinel, or [`DelimitMode::Unbuffered`] as the game mode) since the
//! prompt never ends in a newline.
//!
//! [`DelimitMode::Unbuffered`]: crate::transport::DelimitMode::Unbuffered

pub mod accumulator;
pub mod lines;
pub mod ops;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::dedup::RequestDeduplicator;
use crate::session::{GameSession, SessionEvent};

pub use accumulator::LineAccumulator;
pub use ops::{
    CaptureOp, CheckOp, CompileDiagnostic, CompileStatus, EditOp, Flow, ModifyOp, Outbound,
    ScriptCompileResult, ScriptError, ScriptProperties, ScriptTarget, SendOp,
};

/// Default inactivity timeout for one editor operation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

type Download = (ScriptProperties, String);

struct Inner {
    session: Arc<GameSession>,
    timeout: Duration,
    /// Held for the whole of each editor exchange.
    busy: Mutex<()>,
    modifies: RequestDeduplicator<ScriptTarget, ScriptProperties, ScriptError>,
    downloads: RequestDeduplicator<ScriptTarget, Download, ScriptError>,
}

#[derive(Clone)]
pub struct ScriptEditEngine {
    inner: Arc<Inner>,
}

impl ScriptEditEngine {
    pub fn new(session: Arc<GameSession>) -> Self {
        Self::with_timeout(session, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(session: Arc<GameSession>, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                session,
                timeout,
                busy: Mutex::new(()),
                modifies: RequestDeduplicator::new(),
                downloads: RequestDeduplicator::new(),
            }),
        }
    }

    pub fn session(&self) -> &Arc<GameSession> {
        &self.inner.session
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// `/ss <n>`: the script's details, including its last-modified time.
    pub async fn check_script(&self, script: u32) -> Result<ScriptProperties, ScriptError> {
        let _busy = self.inner.busy.lock().await;
        self.drive(CheckOp::new(script)).await
    }

    /// Open a script in the editor.  Concurrent calls for the same target
    /// share one exchange.
    pub async fn modify_script(&self, target: ScriptTarget) -> Result<ScriptProperties, ScriptError> {
        let engine = self.clone();
        self.inner
            .modifies
            .run(target.clone(), move || async move {
                let _busy = engine.inner.busy.lock().await;
                engine.drive(ModifyOp::new(target)).await
            })
            .await
    }

    /// Print the open script and leave the editor.
    pub async fn capture_script(&self) -> Result<String, ScriptError> {
        let _busy = self.inner.busy.lock().await;
        self.drive(CaptureOp::new()).await
    }

    /// Replace the open script with `source` and compile it.
    pub async fn send_script(&self, source: Vec<String>) -> Result<ScriptCompileResult, ScriptError> {
        let _busy = self.inner.busy.lock().await;
        self.drive(SendOp::new(source)).await
    }

    /// Open and capture a script as one exchange.  Concurrent calls for the
    /// same target share it.
    pub async fn download_script(&self, target: ScriptTarget) -> Result<Download, ScriptError> {
        let engine = self.clone();
        self.inner
            .downloads
            .run(target.clone(), move || async move {
                let _busy = engine.inner.busy.lock().await;
                let props = engine.drive(ModifyOp::new(target)).await?;
                let text = engine.drive(CaptureOp::new()).await?;
                Ok((props, text))
            })
            .await
    }

    /// Open a script, replace its text and compile it, holding the editor
    /// throughout.
    pub async fn upload_script(
        &self,
        target: ScriptTarget,
        source: Vec<String>,
    ) -> Result<ScriptCompileResult, ScriptError> {
        let _busy = self.inner.busy.lock().await;
        self.drive(ModifyOp::new(target)).await?;
        self.drive(SendOp::new(source)).await
    }

    fn dispatch(&self, out: &mut Vec<Outbound>) {
        for cmd in out.drain(..) {
            if !self.inner.session.send(&cmd.text, cmd.echo) {
                warn!(command = %cmd.text, "game session is gone; command dropped");
            }
        }
    }

    fn settle<T>(&self, flow: Flow<T>, out: &mut Vec<Outbound>) -> Option<Result<T, ScriptError>> {
        self.dispatch(out);
        match flow {
            Flow::Continue => None,
            Flow::Done(v) => Some(Ok(v)),
            Flow::Fail(e) => Some(Err(e)),
        }
    }

    /// Run one operation to completion.  Callers hold `busy`.
    async fn drive<O: EditOp>(&self, op: O) -> Result<O::Output, ScriptError> {
        let events = self.inner.session.subscribe();
        self.drive_events(op, events).await
    }

    async fn drive_events<O: EditOp>(
        &self,
        mut op: O,
        mut events: broadcast::Receiver<SessionEvent>,
    ) -> Result<O::Output, ScriptError> {
        let mut acc = LineAccumulator::new();
        let mut out = Vec::new();

        debug!(op = op.name(), "editor operation started");
        op.start(&mut out);
        self.dispatch(&mut out);

        loop {
            let event = match timeout(self.inner.timeout, events.recv()).await {
                Err(_) => {
                    warn!(op = op.name(), timeout = ?self.inner.timeout, "editor operation timed out");
                    return Err(ScriptError::Timeout(self.inner.timeout));
                }
                Ok(Err(RecvError::Closed)) => return Err(ScriptError::SessionClosed),
                Ok(Err(RecvError::Lagged(n))) => {
                    warn!(op = op.name(), missed = n, "editor fell behind the session");
                    return Err(ScriptError::Lagged(n));
                }
                Ok(Ok(event)) => event,
            };
            let text = match event {
                SessionEvent::Text(text) => text,
                SessionEvent::Quit => return Err(ScriptError::SessionClosed),
                _ => continue,
            };

            for line in acc.push(&text) {
                let flow = op.on_line(&line, &mut out);
                if let Some(result) = self.settle(flow, &mut out) {
                    info!(op = op.name(), ok = result.is_ok(), "editor operation finished");
                    return result;
                }
            }
            if lines::is_prompt(acc.peek()) {
                acc.flush();
                let flow = op.on_prompt(&mut out);
                if let Some(result) = self.settle(flow, &mut out) {
                    info!(op = op.name(), ok = result.is_ok(), "editor operation finished");
                    return result;
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
