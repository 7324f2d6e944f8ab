//! Session launch descriptor (SAL).
//!
//! The final `L` reply of the login handshake carries a tab-separated list of
//! `KEY=value` fields describing where the gameplay connection lives and which
//! key authorises it.  [`SessionDescriptor`] is the parsed, immutable form of
//! that reply; it only exists once every required field has been seen.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::warn;

// ── SalError ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SalError {
    #[error("session descriptor is missing `{0}`")]
    Missing(&'static str),
    #[error("session descriptor field `{key}` is not a port number: {value:?}")]
    BadPort { key: &'static str, value: String },
}

// ── SessionDescriptor ─────────────────────────────────────────────────────────

/// Parameters needed to open the gameplay connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub up_port: u16,
    pub game: String,
    pub game_code: String,
    pub full_game_name: String,
    pub game_file: String,
    pub game_host: String,
    pub game_port: u16,
    /// Opaque session token written as the first line of the game connection.
    pub key: String,
    /// Fields the client does not interpret, with their keys as received.
    pub extra: BTreeMap<String, String>,
}

impl SessionDescriptor {
    /// Parse a complete SAL reply line (`L\tOK\tKEY=...\t...`).
    ///
    /// Fields without an `=` (the leading status code and result) are ignored.
    pub fn parse(line: &str) -> Result<Self, SalError> {
        Self::from_fields(line.trim_end_matches(['\r', '\n']).split('\t'))
    }

    /// Build a descriptor from `KEY=value` fields in any order.  Keys are
    /// matched case-insensitively.
    pub fn from_fields<'a>(fields: impl IntoIterator<Item = &'a str>) -> Result<Self, SalError> {
        let mut up_port = None;
        let mut game = String::new();
        let mut game_code = String::new();
        let mut full_game_name = String::new();
        let mut game_file = String::new();
        let mut game_host = None;
        let mut game_port = None;
        let mut key = None;
        let mut extra = BTreeMap::new();

        for field in fields {
            let Some((name, value)) = field.split_once('=') else { continue };
            match name.to_ascii_lowercase().as_str() {
                "upport" => up_port = Some(parse_port("upport", value)?),
                "game" => game = value.to_owned(),
                "gamecode" => game_code = value.to_owned(),
                "fullgamename" => full_game_name = value.to_owned(),
                "gamefile" => game_file = value.to_owned(),
                "gamehost" => game_host = Some(value.to_owned()),
                "gameport" => game_port = Some(parse_port("gameport", value)?),
                "key" => key = Some(value.to_owned()),
                _ => {
                    extra.insert(name.to_owned(), value.to_owned());
                }
            }
        }

        let game_host = game_host.ok_or(SalError::Missing("GAMEHOST"))?;
        let game_port = game_port.ok_or(SalError::Missing("GAMEPORT"))?;
        let key = key.ok_or(SalError::Missing("KEY"))?;
        if up_port.is_none() {
            warn!("session descriptor has no UPPORT, defaulting to 0");
        }

        Ok(Self {
            up_port: up_port.unwrap_or(0),
            game,
            game_code,
            full_game_name,
            game_file,
            game_host,
            game_port,
            key,
            extra,
        })
    }

    /// `host:port` of the gameplay server.
    pub fn address(&self) -> String {
        format!("{}:{}", self.game_host, self.game_port)
    }
}

fn parse_port(key: &'static str, value: &str) -> Result<u16, SalError> {
    value
        .trim()
        .parse()
        .map_err(|_| SalError::BadPort { key, value: value.to_owned() })
}

// ── Tests ─────────────────────────────────────────────────────────────────────
