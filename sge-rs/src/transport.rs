//! Game connection transport: one TCP socket, delimiter framing, write queue.
//!
//! [`Framer`] is the pure half.  It turns raw bytes into [`TransportEvent::Line`]
//! or [`TransportEvent::Text`] according to the active [`DelimitMode`], and
//! watches for the in-band `<mode id="GAME"/>` / `<mode id="CMD"/>` sentinels
//! that switch modes mid-stream.  It holds no I/O handles and is tested on
//! its own.
//!
//! [`Transport`] owns the socket and the connection state machine:
//!
//! ```text
//! Initialized → Connecting → Connected → { Closed | Error }
//! ```
//!
//! Every operation returns the events it produced instead of raising, so a
//! usage error (e.g. connecting twice) travels the same path as a socket
//! error.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

/// Sentinel line that switches an unset stream into the configured game mode.
pub const GAME_MODE_SENTINEL: &str = "<mode id=\"GAME\"/>";
/// Sentinel line that switches an unset stream into unbuffered mode.
pub const CMD_MODE_SENTINEL: &str = "<mode id=\"CMD\"/>";

const READ_BUF: usize = 8192;

// ── Modes and states ──────────────────────────────────────────────────────────

/// How the inbound byte stream is split into messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DelimitMode {
    /// `\n`-delimited lines; mode sentinels are honoured.
    #[default]
    Unset,
    /// `\r\n`-delimited lines.
    LineBuffered,
    /// Raw text forwarded as it arrives.
    Unbuffered,
}

impl DelimitMode {
    fn delimiter(self) -> Option<&'static [u8]> {
        match self {
            DelimitMode::Unset => Some(b"\n"),
            DelimitMode::LineBuffered => Some(b"\r\n"),
            DelimitMode::Unbuffered => None,
        }
    }

    /// The delimiter a consumer should re-append to a [`TransportEvent::Line`]
    /// to recover the original text.
    pub fn line_ending(self) -> &'static str {
        match self {
            DelimitMode::LineBuffered => "\r\n",
            _ => "\n",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Initialized,
    Connecting,
    Connected,
    Closed,
    Error,
}

// ── Events ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport operation not valid in state {0:?}")]
    InvalidState(TransportState),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug)]
pub enum TransportEvent {
    /// Socket connected and the session key has been sent.
    Connect,
    /// One delimited message, delimiter stripped.
    Line(String),
    /// Raw text received in unbuffered mode.
    Text(String),
    Error(TransportError),
    Close,
}

// ── Framer (pure) ─────────────────────────────────────────────────────────────

/// Inbound framing state.  Feed bytes with [`Framer::process`].
#[derive(Debug)]
pub struct Framer {
    mode: DelimitMode,
    /// Mode entered when the game sentinel is seen.
    game_mode: DelimitMode,
    buf: Vec<u8>,
    /// Offset in `buf` before which no delimiter can start.
    scan_from: usize,
}

impl Framer {
    pub fn new(game_mode: DelimitMode) -> Self {
        Self { mode: DelimitMode::Unset, game_mode, buf: Vec::new(), scan_from: 0 }
    }

    pub fn mode(&self) -> DelimitMode {
        self.mode
    }

    /// Bytes received but not yet emitted.
    pub fn pending(&self) -> &[u8] {
        &self.buf
    }

    /// Consume `raw` and return every complete message it finishes.
    pub fn process(&mut self, raw: &[u8]) -> Vec<TransportEvent> {
        self.buf.extend_from_slice(raw);
        let mut events = Vec::new();

        loop {
            let Some(delim) = self.mode.delimiter() else {
                let text = take_text(&mut self.buf);
                if !text.is_empty() {
                    events.push(TransportEvent::Text(text));
                }
                self.scan_from = 0;
                return events;
            };

            let mut line_start = 0;
            let mut search = self.scan_from;
            let mut switched = false;

            while let Some(pos) = find(&self.buf[search..], delim) {
                let end = search + pos;
                let line = String::from_utf8_lossy(&self.buf[line_start..end]).into_owned();
                line_start = end + delim.len();
                search = line_start;

                if self.mode == DelimitMode::Unset {
                    if let Some(next) = self.sentinel_mode(&line) {
                        debug!(from = ?self.mode, to = ?next, "delimiting mode switch");
                        self.mode = next;
                        switched = true;
                        break;
                    }
                }
                events.push(TransportEvent::Line(line));
            }

            self.buf.drain(..line_start);
            if switched {
                // Re-frame whatever followed the sentinel under the new mode.
                self.scan_from = 0;
                continue;
            }
            self.scan_from = self.buf.len().saturating_sub(delim.len() - 1);
            return events;
        }
    }

    fn sentinel_mode(&self, line: &str) -> Option<DelimitMode> {
        match line.trim() {
            GAME_MODE_SENTINEL => Some(self.game_mode),
            CMD_MODE_SENTINEL => Some(DelimitMode::Unbuffered),
            _ => None,
        }
    }
}

fn find(hay: &[u8], needle: &[u8]) -> Option<usize> {
    hay.windows(needle.len()).position(|w| w == needle)
}

/// Drain `buf` as text, holding back a UTF-8 sequence split by the chunk end.
fn take_text(buf: &mut Vec<u8>) -> String {
    let valid = match std::str::from_utf8(buf) {
        Ok(_) => buf.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        Err(_) => buf.len(),
    };
    let rest = buf.split_off(valid);
    let text = String::from_utf8_lossy(buf).into_owned();
    *buf = rest;
    text
}

// ── Transport (I/O) ───────────────────────────────────────────────────────────

/// Where to connect and what to present once connected.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub host: String,
    pub port: u16,
    /// Session key written as the first line after connecting.
    pub key: String,
    /// Mode entered on `<mode id="GAME"/>`.
    pub game_mode: DelimitMode,
}

/// Owner of the gameplay socket.
pub struct Transport {
    config: TransportConfig,
    state: TransportState,
    framer: Framer,
    stream: Option<TcpStream>,
    /// Outbound bytes queued until the socket is writable.
    pending: Vec<u8>,
}

impl Transport {
    pub fn new(config: TransportConfig) -> Self {
        let framer = Framer::new(config.game_mode);
        Self {
            config,
            state: TransportState::Initialized,
            framer,
            stream: None,
            pending: Vec::new(),
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn mode(&self) -> DelimitMode {
        self.framer.mode()
    }

    /// Open the socket, send the session key, flush queued writes.
    pub async fn connect(&mut self) -> Vec<TransportEvent> {
        if self.state != TransportState::Initialized {
            warn!(state = ?self.state, "connect called on a used transport");
            return vec![TransportEvent::Error(TransportError::InvalidState(self.state))];
        }

        self.state = TransportState::Connecting;
        debug!(host = %self.config.host, port = self.config.port, "connecting");

        let stream = match TcpStream::connect((self.config.host.as_str(), self.config.port)).await {
            Ok(s) => s,
            Err(e) => {
                self.teardown(TransportState::Error);
                return vec![TransportEvent::Error(e.into())];
            }
        };
        self.stream = Some(stream);
        self.state = TransportState::Connected;

        let mut hello = Vec::with_capacity(self.config.key.len() + 1 + self.pending.len());
        hello.extend_from_slice(self.config.key.as_bytes());
        hello.push(b'\n');
        hello.append(&mut self.pending);
        if let Err(e) = self.write_stream(&hello).await {
            self.teardown(TransportState::Error);
            return vec![TransportEvent::Error(e.into())];
        }

        debug!("connected");
        vec![TransportEvent::Connect]
    }

    /// Write `data`, or queue it if the socket is not connected yet.
    ///
    /// Writes after teardown are dropped.
    pub async fn write(&mut self, data: &[u8]) -> Vec<TransportEvent> {
        match self.state {
            TransportState::Initialized | TransportState::Connecting => {
                self.pending.extend_from_slice(data);
                Vec::new()
            }
            TransportState::Connected => {
                let mut out = std::mem::take(&mut self.pending);
                out.extend_from_slice(data);
                match self.write_stream(&out).await {
                    Ok(()) => Vec::new(),
                    Err(e) => {
                        self.teardown(TransportState::Error);
                        vec![TransportEvent::Error(e.into())]
                    }
                }
            }
            TransportState::Closed | TransportState::Error => {
                debug!(bytes = data.len(), "dropping write on torn-down transport");
                Vec::new()
            }
        }
    }

    /// Read one chunk from the socket and frame it.
    pub async fn recv(&mut self) -> Vec<TransportEvent> {
        let Some(stream) = self.stream.as_mut() else {
            return vec![TransportEvent::Error(TransportError::InvalidState(self.state))];
        };

        let mut raw = [0u8; READ_BUF];
        match stream.read(&mut raw).await {
            Ok(0) => {
                debug!("remote closed connection");
                self.teardown(TransportState::Closed);
                vec![TransportEvent::Close]
            }
            Ok(n) => {
                trace!(bytes = n, "recv");
                self.framer.process(&raw[..n])
            }
            Err(e) => {
                self.teardown(TransportState::Error);
                vec![TransportEvent::Error(e.into())]
            }
        }
    }

    /// Close the socket.  A second call is a no-op.
    pub async fn close(&mut self) -> Vec<TransportEvent> {
        if matches!(self.state, TransportState::Closed | TransportState::Error) {
            return Vec::new();
        }
        if let Some(stream) = self.stream.as_mut() {
            let _ = stream.shutdown().await;
        }
        self.teardown(TransportState::Closed);
        vec![TransportEvent::Close]
    }

    async fn write_stream(&mut self, data: &[u8]) -> io::Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "no socket"));
        };
        trace!(bytes = data.len(), "send");
        stream.write_all(data).await
    }

    /// Release the socket and queued data.  Returns `false` if already done.
    fn teardown(&mut self, state: TransportState) -> bool {
        if matches!(self.state, TransportState::Closed | TransportState::Error) {
            return false;
        }
        debug!(?state, "transport teardown");
        self.state = state;
        self.stream = None;
        self.pending.clear();
        true
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn lines(events: &[TransportEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Line(l) => Some(l.as_str()),
                _ => None,
            })
            .collect()
    }

    fn text(events: &[TransportEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                TransportEvent::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect()
    }

    // ── Framer ───────────────────────────────────────────────────────────

    #[test]
    fn unset_mode_splits_on_newline() {
        let mut f = Framer::new(DelimitMode::Unbuffered);
        let events = f.process(b"one\ntwo\n");
        assert_eq!(lines(&events), ["one", "two"]);
    }

    #[test]
    fn partial_line_stays_buffered() {
        let mut f = Framer::new(DelimitMode::Unbuffered);
        assert!(f.process(b"hal").is_empty());
        assert_eq!(f.pending(), b"hal");
        let events = f.process(b"f\nrest");
        assert_eq!(lines(&events), ["half"]);
        assert_eq!(f.pending(), b"rest");
    }

    #[test]
    fn line_buffered_needs_crlf() {
        let mut f = Framer::new(DelimitMode::LineBuffered);
        let events = f.process(format!("{GAME_MODE_SENTINEL}\na\nb\r\nc\r").as_bytes());
        assert_eq!(f.mode(), DelimitMode::LineBuffered);
        assert_eq!(lines(&events), ["a\nb"]);
        let events = f.process(b"\n");
        assert_eq!(lines(&events), ["c"]);
    }

    #[test]
    fn game_sentinel_switches_mid_chunk() {
        let mut f = Framer::new(DelimitMode::Unbuffered);
        let input = format!("before\n{GAME_MODE_SENTINEL}\n<prompt>&gt;</prompt>\nmore");
        let events = f.process(input.as_bytes());
        assert_eq!(lines(&events), ["before"]);
        assert_eq!(text(&events), "<prompt>&gt;</prompt>\nmore");
        assert_eq!(f.mode(), DelimitMode::Unbuffered);
    }

    #[test]
    fn sentinel_is_never_forwarded() {
        let mut f = Framer::new(DelimitMode::LineBuffered);
        let events = f.process(format!("{GAME_MODE_SENTINEL}\r\n").as_bytes());
        assert!(events.is_empty());
    }

    #[test]
    fn cmd_sentinel_switches_to_unbuffered() {
        let mut f = Framer::new(DelimitMode::LineBuffered);
        let events = f.process(format!("{CMD_MODE_SENTINEL}\nraw").as_bytes());
        assert_eq!(f.mode(), DelimitMode::Unbuffered);
        assert_eq!(text(&events), "raw");
    }

    #[test]
    fn sentinel_split_across_chunks() {
        let mut f = Framer::new(DelimitMode::Unbuffered);
        let (a, b) = GAME_MODE_SENTINEL.split_at(6);
        assert!(f.process(a.as_bytes()).is_empty());
        let events = f.process(format!("{b}\nhi").as_bytes());
        assert_eq!(text(&events), "hi");
    }

    #[test]
    fn sentinels_ignored_after_unset() {
        let mut f = Framer::new(DelimitMode::LineBuffered);
        f.process(format!("{GAME_MODE_SENTINEL}\n").as_bytes());
        let events = f.process(format!("{CMD_MODE_SENTINEL}\r\n").as_bytes());
        assert_eq!(lines(&events), [CMD_MODE_SENTINEL]);
        assert_eq!(f.mode(), DelimitMode::LineBuffered);
    }

    #[test]
    fn unbuffered_holds_split_utf8() {
        let mut f = Framer::new(DelimitMode::Unbuffered);
        f.process(format!("{GAME_MODE_SENTINEL}\n").as_bytes());
        let bytes = "é".as_bytes();
        assert!(f.process(&bytes[..1]).is_empty());
        assert_eq!(text(&f.process(&bytes[1..])), "é");
    }

    #[test]
    fn crlf_delimiter_split_across_chunks() {
        let mut f = Framer::new(DelimitMode::LineBuffered);
        f.process(format!("{GAME_MODE_SENTINEL}\n").as_bytes());
        assert!(f.process(b"line\r").is_empty());
        assert_eq!(lines(&f.process(b"\n")), ["line"]);
    }

    // ── Transport over loopback ──────────────────────────────────────────

    fn config(port: u16) -> TransportConfig {
        TransportConfig {
            host: "127.0.0.1".into(),
            port,
            key: "SESSIONKEY".into(),
            game_mode: DelimitMode::Unbuffered,
        }
    }

    #[tokio::test]
    async fn connect_sends_key_then_queued_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut got = Vec::new();
            sock.read_to_end(&mut got).await.unwrap();
            got
        });

        let mut t = Transport::new(config(addr.port()));
        assert!(t.write(b"early\n").await.is_empty());
        let events = t.connect().await;
        assert!(matches!(events.as_slice(), [TransportEvent::Connect]));
        assert_eq!(t.state(), TransportState::Connected);
        assert!(t.write(b"later\n").await.is_empty());
        t.close().await;

        assert_eq!(server.await.unwrap(), b"SESSIONKEY\nearly\nlater\n");
    }

    #[tokio::test]
    async fn second_connect_reports_invalid_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move { listener.accept().await });

        let mut t = Transport::new(config(addr.port()));
        t.connect().await;
        let events = t.connect().await;
        assert!(matches!(
            events.as_slice(),
            [TransportEvent::Error(TransportError::InvalidState(TransportState::Connected))]
        ));
        assert_eq!(t.state(), TransportState::Connected);
    }

    #[tokio::test]
    async fn connect_refused_is_error_event() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut t = Transport::new(config(port));
        let events = t.connect().await;
        assert!(matches!(events.as_slice(), [TransportEvent::Error(TransportError::Io(_))]));
        assert_eq!(t.state(), TransportState::Error);
        assert!(t.close().await.is_empty());
    }

    #[tokio::test]
    async fn remote_close_then_close_is_noop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"bye\n").await.unwrap();
        });

        let mut t = Transport::new(config(addr.port()));
        t.connect().await;
        server.await.unwrap();

        let mut seen = Vec::new();
        loop {
            let events = t.recv().await;
            let done = events.iter().any(|e| matches!(e, TransportEvent::Close));
            seen.extend(events);
            if done {
                break;
            }
        }
        assert_eq!(lines(&seen), ["bye"]);
        assert_eq!(t.state(), TransportState::Closed);
        assert!(t.close().await.is_empty());
        assert!(t.write(b"ignored\n").await.is_empty());
    }
}
