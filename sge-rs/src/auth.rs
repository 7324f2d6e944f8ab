//! Login handshake against the SGE authentication server.
//!
//! The handshake is a fixed sequence of single-line, tab-separated request /
//! reply pairs with no correlation ids, so every request waits for its reply:
//!
//! ```text
//!   <- hash key            (unsolicited, on connect)
//!   -> A  account hash     <- A account KEY key owner
//!   -> M                   <- M code name code name ...
//!   -> F  code             <- tag access          (once per game, in turn)
//!   -> G  code             <- G ...
//!   -> N  code             <- N ENV|STORM|TRIAL
//!   -> C                   <- C count slots ... code name ...
//!   -> L  code PLAY|STORM  <- L OK KEY=value ...
//! ```
//!
//! The steps are exposed as a typestate chain: [`AuthClient::login`] yields a
//! [`LoginChoice`], whose [`LoginChoice::select_game`] yields a
//! [`CharacterChoice`], whose [`CharacterChoice::select_character`] yields the
//! [`SessionDescriptor`] and closes the login socket.  Any reply with the
//! wrong leading code closes the socket and surfaces as
//! [`AuthError::Protocol`].
//!
//! Plain and TLS servers share the same state machine; only
//! [`AuthConnector`] differs.

use std::fmt;
use std::io;

use regex::Regex;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, trace};

use crate::sal::{SalError, SessionDescriptor};
use crate::tls;

pub const DEFAULT_AUTH_HOST: &str = "eaccess.play.net";
pub const PLAIN_PORT: u16 = 7900;
pub const TLS_PORT: u16 = 7910;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Credential failures reported in the `A` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialProblem {
    /// `NORECORD`: no such account.
    NoRecord,
    /// `PASSWORD`: wrong password.
    Password,
}

impl fmt::Display for CredentialProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialProblem::NoRecord => write!(f, "no account exists with that name"),
            CredentialProblem::Password => write!(f, "the password is incorrect"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login failed: {0}")]
    Credentials(CredentialProblem),
    #[error("login failed with unrecognised result {0:?}")]
    UnknownResult(String),
    #[error("unexpected reply to `{expected}` request: {got:?}")]
    Protocol { expected: &'static str, got: String },
    #[error("`{step}` request refused: {reason}")]
    Rejected { step: &'static str, reason: String },
    #[error("login server certificate does not match the pinned key")]
    PinMismatch,
    #[error("TLS setup failed: {0}")]
    Tls(String),
    #[error("login server closed the connection")]
    Closed,
    #[error("no game with code {0:?}")]
    UnknownGame(String),
    #[error("no character {0:?}")]
    UnknownCharacter(String),
    #[error(transparent)]
    Sal(#[from] SalError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

// ── Password hash ─────────────────────────────────────────────────────────────

/// Obfuscate `password` with the server's hash key.
///
/// `hash[i] = ((password[i] - 0x20) ^ key[i]) + 0x20`, wrapping.  Applying it
/// twice with the same key yields the password again.
pub fn hash_password(password: &[u8], key: &[u8]) -> Vec<u8> {
    password
        .iter()
        .enumerate()
        .map(|(i, &p)| {
            let k = key.get(i).copied().unwrap_or(0);
            (p.wrapping_sub(0x20) ^ k).wrapping_add(0x20)
        })
        .collect()
}

// ── Data model ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameOption {
    pub code: String,
    pub name: String,
    /// Access level from the `F` probe, once probed.
    pub access: Option<String>,
    pub production: bool,
    pub development: bool,
    pub storm: bool,
    pub trial: bool,
}

impl GameOption {
    /// Apply the `ENV|STORM|TRIAL` field of an `N` reply.
    fn apply_environment(&mut self, field: &str) {
        for flag in field.split('|').map(str::trim) {
            match flag.to_ascii_uppercase().as_str() {
                "PRODUCTION" => self.production = true,
                "DEVELOPMENT" => self.development = true,
                "STORM" => self.storm = true,
                "TRIAL" => self.trial = true,
                _ => {}
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacterOption {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginMode {
    #[default]
    Play,
    Storm,
}

impl LoginMode {
    fn wire(self) -> &'static str {
        match self {
            LoginMode::Play => "PLAY",
            LoginMode::Storm => "STORM",
        }
    }
}

impl fmt::Display for LoginMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoginMode::Play => write!(f, "play"),
            LoginMode::Storm => write!(f, "storm"),
        }
    }
}

/// What was chosen, for display and bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginDetails {
    pub account: String,
    pub game: String,
    pub character: String,
    pub mode: LoginMode,
    pub label: String,
}

/// Fields of a successful `A` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthReply {
    pub account: String,
    pub key: String,
    pub owner: String,
}

/// Restricts which games are kept (and probed) after the `M` listing.
#[derive(Debug, Clone)]
pub struct GameFilter(Regex);

impl GameFilter {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self(Regex::new(pattern)?))
    }

    pub fn matches(&self, game: &GameOption) -> bool {
        self.0.is_match(&game.code) || self.0.is_match(&game.name)
    }
}

// ── Reply parsing ─────────────────────────────────────────────────────────────

fn fields(line: &str) -> Vec<String> {
    line.split('\t').map(str::to_owned).collect()
}

fn expect_code(fields: &[String], expected: &'static str) -> Result<(), AuthError> {
    match fields.first() {
        Some(code) if code == expected => Ok(()),
        _ => Err(AuthError::Protocol { expected, got: fields.join("\t") }),
    }
}

/// Interpret `<code>\t<account>\t<result>\t<key>\t<owner>`.
pub fn parse_auth_reply(line: &str) -> Result<AuthReply, AuthError> {
    let f = fields(line);
    expect_code(&f, "A")?;
    let get = |i: usize| f.get(i).cloned().unwrap_or_default();
    match get(2).as_str() {
        "KEY" => Ok(AuthReply { account: get(1), key: get(3), owner: get(4) }),
        "NORECORD" => Err(AuthError::Credentials(CredentialProblem::NoRecord)),
        "PASSWORD" => Err(AuthError::Credentials(CredentialProblem::Password)),
        other => Err(AuthError::UnknownResult(other.to_owned())),
    }
}

/// Pair up a flat `code name code name ...` list.
fn pairs(flat: &[String]) -> impl Iterator<Item = (String, String)> + '_ {
    flat.chunks_exact(2).map(|p| (p[0].clone(), p[1].clone()))
}

fn parse_characters(f: &[String]) -> Vec<CharacterOption> {
    let rest = f.get(3..).unwrap_or_default();
    // Some servers put extra counters before the pairs; the pairs are the tail.
    let tail = match f.get(1).and_then(|c| c.parse::<usize>().ok()) {
        Some(count) if count * 2 <= rest.len() => &rest[rest.len() - count * 2..],
        _ => rest,
    };
    pairs(tail).map(|(code, name)| CharacterOption { code, name }).collect()
}

// ── Line connection ───────────────────────────────────────────────────────────

/// Byte stream the handshake can run over.
pub trait AuthStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AuthStream for T {}

type BoxStream = Box<dyn AuthStream>;

struct Handshake {
    stream: BufReader<BoxStream>,
}

impl Handshake {
    fn new(stream: BoxStream) -> Self {
        Self { stream: BufReader::new(stream) }
    }

    async fn read_raw(&mut self) -> Result<Vec<u8>, AuthError> {
        let mut buf = Vec::new();
        if self.stream.read_until(b'\n', &mut buf).await? == 0 {
            return Err(AuthError::Closed);
        }
        while matches!(buf.last(), Some(b'\n' | b'\r')) {
            buf.pop();
        }
        Ok(buf)
    }

    async fn read_line(&mut self) -> Result<String, AuthError> {
        let raw = self.read_raw().await?;
        let line = String::from_utf8_lossy(&raw).into_owned();
        trace!(%line, "auth recv");
        Ok(line)
    }

    async fn send(&mut self, msg: &[u8]) -> Result<(), AuthError> {
        let stream = self.stream.get_mut();
        stream.write_all(msg).await?;
        stream.write_all(b"\n").await?;
        stream.flush().await?;
        Ok(())
    }

    /// Send `msg` and return the reply's fields, checking its leading code.
    async fn request(&mut self, msg: &str, expected: &'static str) -> Result<Vec<String>, AuthError> {
        trace!(%msg, "auth send");
        self.send(msg.as_bytes()).await?;
        let f = fields(&self.read_line().await?);
        expect_code(&f, expected)?;
        Ok(f)
    }

    /// Send `msg` and return the reply's fields without checking the code.
    async fn probe(&mut self, msg: &str) -> Result<Vec<String>, AuthError> {
        trace!(%msg, "auth send");
        self.send(msg.as_bytes()).await?;
        Ok(fields(&self.read_line().await?))
    }

    async fn close(mut self) {
        let _ = self.stream.get_mut().shutdown().await;
    }
}

// ── AuthClient ────────────────────────────────────────────────────────────────

/// How the login socket is established.
#[derive(Debug, Clone)]
pub enum AuthConnector {
    Plain,
    /// TLS, accepting only a certificate that carries `pinned_key`.
    Tls { pinned_key: Vec<u8> },
}

#[derive(Debug, Clone)]
pub struct AuthClient {
    pub host: String,
    pub port: u16,
    pub connector: AuthConnector,
}

impl AuthClient {
    pub fn new(host: impl Into<String>, port: u16, connector: AuthConnector) -> Self {
        Self { host: host.into(), port, connector }
    }

    async fn open(&self) -> Result<BoxStream, AuthError> {
        debug!(host = %self.host, port = self.port, "opening login connection");
        let tcp = TcpStream::connect((self.host.as_str(), self.port)).await?;
        match &self.connector {
            AuthConnector::Plain => Ok(Box::new(tcp)),
            AuthConnector::Tls { pinned_key } => {
                let connector = TlsConnector::from(tls::client_config(pinned_key));
                let name = ServerName::try_from(self.host.clone())
                    .map_err(|e| AuthError::Tls(e.to_string()))?;
                let stream = connector.connect(name, tcp).await.map_err(|e| {
                    if tls::is_pin_mismatch(&e) {
                        AuthError::PinMismatch
                    } else {
                        AuthError::Io(e)
                    }
                })?;
                Ok(Box::new(stream))
            }
        }
    }

    /// Authenticate and list the available games.
    pub async fn login(
        &self,
        account: &str,
        password: &str,
        filter: Option<&GameFilter>,
    ) -> Result<LoginChoice, AuthError> {
        let stream = self.open().await?;
        login_over(stream, account, password, filter).await
    }
}

/// Run the handshake over an already-established stream.
pub async fn login_over<S: AuthStream + 'static>(
    stream: S,
    account: &str,
    password: &str,
    filter: Option<&GameFilter>,
) -> Result<LoginChoice, AuthError> {
    let mut conn = Handshake::new(Box::new(stream));
    match authenticate(&mut conn, account, password, filter).await {
        Ok((reply, games)) => {
            info!(account = %reply.account, games = games.len(), "authenticated");
            Ok(LoginChoice { conn, account: reply.account, owner: reply.owner, games })
        }
        Err(e) => {
            conn.close().await;
            Err(e)
        }
    }
}

async fn authenticate(
    conn: &mut Handshake,
    account: &str,
    password: &str,
    filter: Option<&GameFilter>,
) -> Result<(AuthReply, Vec<GameOption>), AuthError> {
    let key = conn.read_raw().await?;
    debug!(key_len = key.len(), "received hash key");

    let mut msg = format!("A\t{account}\t").into_bytes();
    msg.extend(hash_password(password.as_bytes(), &key));
    conn.send(&msg).await?;
    let reply = parse_auth_reply(&conn.read_line().await?)?;

    let listing = conn.request("M", "M").await?;
    let mut games: Vec<GameOption> = pairs(&listing[1..])
        .map(|(code, name)| GameOption { code, name, ..GameOption::default() })
        .filter(|g| filter.map_or(true, |f| f.matches(g)))
        .collect();

    // One probe in flight at a time: replies carry no correlation id.
    for game in &mut games {
        let f = conn.probe(&format!("F\t{}", game.code)).await?;
        game.access = f.get(1).cloned();
        debug!(code = %game.code, access = ?game.access, "probed game access");
    }

    Ok((reply, games))
}

// ── LoginChoice ───────────────────────────────────────────────────────────────

/// Authenticated; waiting for a game to be chosen.
pub struct LoginChoice {
    conn: Handshake,
    account: String,
    owner: String,
    games: Vec<GameOption>,
}

impl LoginChoice {
    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn games(&self) -> &[GameOption] {
        &self.games
    }

    /// Select a game by code (case-insensitive) and list its characters.
    pub async fn select_game(mut self, code: &str) -> Result<CharacterChoice, AuthError> {
        let Some(mut game) = self.games.iter().find(|g| g.code.eq_ignore_ascii_case(code)).cloned()
        else {
            self.conn.close().await;
            return Err(AuthError::UnknownGame(code.to_owned()));
        };

        match select_game_steps(&mut self.conn, &mut game).await {
            Ok(characters) => {
                debug!(game = %game.code, characters = characters.len(), "game selected");
                Ok(CharacterChoice { conn: self.conn, account: self.account, game, characters })
            }
            Err(e) => {
                self.conn.close().await;
                Err(e)
            }
        }
    }

    pub async fn close(self) {
        self.conn.close().await;
    }
}

async fn select_game_steps(
    conn: &mut Handshake,
    game: &mut GameOption,
) -> Result<Vec<CharacterOption>, AuthError> {
    conn.request(&format!("G\t{}", game.code), "G").await?;
    let env = conn.request(&format!("N\t{}", game.code), "N").await?;
    if let Some(field) = env.get(1) {
        game.apply_environment(field);
    }
    let chars = conn.request("C", "C").await?;
    Ok(parse_characters(&chars))
}

// ── CharacterChoice ───────────────────────────────────────────────────────────

/// Game chosen; waiting for a character.
pub struct CharacterChoice {
    conn: Handshake,
    account: String,
    game: GameOption,
    characters: Vec<CharacterOption>,
}

impl CharacterChoice {
    pub fn game(&self) -> &GameOption {
        &self.game
    }

    pub fn characters(&self) -> &[CharacterOption] {
        &self.characters
    }

    /// Log `character` (code or name) in and return the gameplay parameters.
    ///
    /// Storm-type games always use [`LoginMode::Storm`].
    pub async fn select_character(
        mut self,
        character: &str,
        mode: Option<LoginMode>,
    ) -> Result<(SessionDescriptor, LoginDetails), AuthError> {
        let Some(chosen) = self
            .characters
            .iter()
            .find(|c| c.code.eq_ignore_ascii_case(character) || c.name.eq_ignore_ascii_case(character))
            .cloned()
        else {
            self.conn.close().await;
            return Err(AuthError::UnknownCharacter(character.to_owned()));
        };

        let mode = if self.game.storm { LoginMode::Storm } else { mode.unwrap_or_default() };
        let result = launch(&mut self.conn, &chosen, mode).await;
        self.conn.close().await;
        let sal = result?;

        info!(character = %chosen.name, game = %self.game.code, host = %sal.game_host, "launch granted");
        let details = LoginDetails {
            account: self.account,
            game: self.game.code.clone(),
            character: chosen.name.clone(),
            mode,
            label: format!("{} ({})", chosen.name, self.game.name),
        };
        Ok((sal, details))
    }

    pub async fn close(self) {
        self.conn.close().await;
    }
}

async fn launch(
    conn: &mut Handshake,
    character: &CharacterOption,
    mode: LoginMode,
) -> Result<SessionDescriptor, AuthError> {
    let f = conn.request(&format!("L\t{}\t{}", character.code, mode.wire()), "L").await?;
    match f.get(1).map(String::as_str) {
        Some("OK") => Ok(SessionDescriptor::from_fields(f[2..].iter().map(String::as_str))?),
        _ => Err(AuthError::Rejected { step: "L", reason: f[1..].join(" ") }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio::task::JoinHandle;

    const HASH_KEY: &str = "abcdefghijklmnopqrstuvwxyz012345";

    /// Fake login server: sends the hash key, then answers each request with
    /// the next scripted reply.  Returns every request line it received.
    fn fake_server(stream: DuplexStream, replies: Vec<&'static str>) -> JoinHandle<Vec<Vec<u8>>> {
        tokio::spawn(async move {
            let mut stream = BufReader::new(stream);
            stream.get_mut().write_all(format!("{HASH_KEY}\n").as_bytes()).await.unwrap();
            let mut seen = Vec::new();
            for reply in replies {
                let mut line = Vec::new();
                if stream.read_until(b'\n', &mut line).await.unwrap() == 0 {
                    break;
                }
                line.pop();
                seen.push(line);
                stream.get_mut().write_all(format!("{reply}\n").as_bytes()).await.unwrap();
            }
            seen
        })
    }

    #[test]
    fn hash_matches_formula() {
        let hash = hash_password(b"abc", &[10, 20, 30]);
        assert_eq!(
            hash,
            vec![
                ((0x61 - 0x20) ^ 10) + 0x20,
                ((0x62 - 0x20) ^ 20) + 0x20,
                ((0x63 - 0x20) ^ 30) + 0x20,
            ]
        );
    }

    #[test]
    fn hash_is_self_inverse() {
        let key = HASH_KEY.as_bytes();
        let hashed = hash_password(b"hunter2!", key);
        assert_eq!(hash_password(&hashed, key), b"hunter2!");
    }

    #[test]
    fn auth_reply_success() {
        let r = parse_auth_reply("A\tBOB\tKEY\tXYZ\tOWNER1").unwrap();
        assert_eq!(r, AuthReply { account: "BOB".into(), key: "XYZ".into(), owner: "OWNER1".into() });
    }

    #[test]
    fn auth_reply_credentials() {
        assert!(matches!(
            parse_auth_reply("A\t\tNORECORD"),
            Err(AuthError::Credentials(CredentialProblem::NoRecord))
        ));
        assert!(matches!(
            parse_auth_reply("A\tBOB\tPASSWORD"),
            Err(AuthError::Credentials(CredentialProblem::Password))
        ));
        assert!(matches!(parse_auth_reply("A\tBOB\tREJECT"), Err(AuthError::UnknownResult(r)) if r == "REJECT"));
    }

    #[test]
    fn auth_reply_wrong_code_is_protocol_error() {
        assert!(matches!(
            parse_auth_reply("X\tBOB\tKEY"),
            Err(AuthError::Protocol { expected: "A", got }) if got == "X\tBOB\tKEY"
        ));
    }

    #[test]
    fn environment_flags() {
        let mut g = GameOption::default();
        g.apply_environment("PRODUCTION|STORM|TRIAL");
        assert!(g.production && g.storm && g.trial && !g.development);
    }

    #[test]
    fn characters_take_trailing_pairs() {
        let f = fields("C\t2\t5\t0\t0\tW_BOB_000\tBob\tW_BOB_001\tRob");
        let chars = parse_characters(&f);
        assert_eq!(chars.len(), 2);
        assert_eq!(chars[1], CharacterOption { code: "W_BOB_001".into(), name: "Rob".into() });
    }

    #[test]
    fn characters_without_padding() {
        let f = fields("C\t1\t1\tW_BOB_000\tBob");
        assert_eq!(parse_characters(&f)[0].name, "Bob");
    }

    #[tokio::test]
    async fn full_handshake() {
        let (client, server) = duplex(4096);
        let server = fake_server(
            server,
            vec![
                "A\tBOB\tKEY\tXYZ\tOWNER1",
                "M\tGS3\tGemStone IV\tDR\tDragonRealms",
                "F\tNORMAL",
                "F\tTRIAL",
                "G\tGemStone IV\t0\t1",
                "N\tPRODUCTION|STORM",
                "C\t1\t5\t0\t0\tW_BOB_000\tBobbin",
                "L\tOK\tUPPORT=5535\tGAME=STORM\tGAMECODE=GS3\tFULLGAMENAME=StormFront\t\
                 GAMEFILE=STORMFRONT.EXE\tGAMEHOST=127.0.0.1\tGAMEPORT=4901\tKEY=sessionkey",
            ],
        );

        let choice = login_over(client, "bob", "secret", None).await.unwrap();
        assert_eq!(choice.account(), "BOB");
        assert_eq!(choice.owner(), "OWNER1");
        assert_eq!(choice.games().len(), 2);
        assert_eq!(choice.games()[1].access.as_deref(), Some("TRIAL"));

        let chars = choice.select_game("gs3").await.unwrap();
        assert!(chars.game().storm && chars.game().production);
        assert_eq!(chars.characters()[0].name, "Bobbin");

        let (sal, details) = chars.select_character("Bobbin", Some(LoginMode::Play)).await.unwrap();
        assert_eq!(sal.game_port, 4901);
        assert_eq!(sal.key, "sessionkey");
        assert_eq!(details.mode, LoginMode::Storm);
        assert_eq!(details.label, "Bobbin (GemStone IV)");

        let seen = server.await.unwrap();
        let mut expected_a = b"A\tbob\t".to_vec();
        expected_a.extend(hash_password(b"secret", HASH_KEY.as_bytes()));
        assert_eq!(seen[0], expected_a);
        let rest: Vec<String> = seen[1..].iter().map(|l| String::from_utf8_lossy(l).into_owned()).collect();
        assert_eq!(rest, ["M", "F\tGS3", "F\tDR", "G\tGS3", "N\tGS3", "C", "L\tW_BOB_000\tSTORM"]);
    }

    #[tokio::test]
    async fn filter_limits_probes() {
        let (client, server) = duplex(4096);
        let server = fake_server(
            server,
            vec!["A\tBOB\tKEY\tXYZ\tO", "M\tGS3\tGemStone IV\tDR\tDragonRealms", "F\tNORMAL"],
        );
        let filter = GameFilter::new("^DR$").unwrap();
        let choice = login_over(client, "bob", "pw", Some(&filter)).await.unwrap();
        assert_eq!(choice.games().len(), 1);
        assert_eq!(choice.games()[0].code, "DR");
        choice.close().await;
        let seen = server.await.unwrap();
        assert_eq!(seen.last().unwrap(), b"F\tDR");
    }

    #[tokio::test]
    async fn bad_password_closes() {
        let (client, server) = duplex(4096);
        let server = fake_server(server, vec!["A\tBOB\tPASSWORD", "unused"]);
        let err = login_over(client, "bob", "wrong", None).await.err().unwrap();
        assert!(matches!(err, AuthError::Credentials(CredentialProblem::Password)));
        // The server sees EOF instead of a game-list request.
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn wrong_code_mid_handshake_is_protocol_error() {
        let (client, server) = duplex(4096);
        let _server = fake_server(
            server,
            vec!["A\tBOB\tKEY\tXYZ\tO", "M\tGS3\tGemStone IV", "F\tNORMAL", "X\toops"],
        );
        let choice = login_over(client, "bob", "pw", None).await.unwrap();
        let err = choice.select_game("GS3").await.err().unwrap();
        assert!(matches!(err, AuthError::Protocol { expected: "G", got } if got == "X\toops"));
    }

    #[tokio::test]
    async fn launch_refused() {
        let (client, server) = duplex(4096);
        let _server = fake_server(
            server,
            vec![
                "A\tBOB\tKEY\tXYZ\tO",
                "M\tDR\tDragonRealms",
                "F\tNORMAL",
                "G\tDragonRealms",
                "N\tPRODUCTION",
                "C\t1\t1\tW_BOB_000\tBob",
                "L\tPROBLEM\tsubscription lapsed",
            ],
        );
        let choice = login_over(client, "bob", "pw", None).await.unwrap();
        let chars = choice.select_game("DR").await.unwrap();
        let err = chars.select_character("W_BOB_000", None).await.err().unwrap();
        assert!(matches!(err, AuthError::Rejected { step: "L", .. }));
    }

    #[tokio::test]
    async fn unknown_game_is_reported() {
        let (client, server) = duplex(4096);
        let _server = fake_server(server, vec!["A\tBOB\tKEY\tXYZ\tO", "M\tDR\tDragonRealms", "F\tNORMAL"]);
        let choice = login_over(client, "bob", "pw", None).await.unwrap();
        assert!(matches!(choice.select_game("GS3").await, Err(AuthError::UnknownGame(c)) if c == "GS3"));
    }

    #[tokio::test]
    async fn peer_closing_early_is_closed_error() {
        let (client, server) = duplex(4096);
        drop(server);
        let err = login_over(client, "bob", "pw", None).await.err().unwrap();
        assert!(matches!(err, AuthError::Closed | AuthError::Io(_)));
    }
}
