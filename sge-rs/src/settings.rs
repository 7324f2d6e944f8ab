//! Settings store.
//!
//! Plain string values as written by `/set`, with typed accessors that supply
//! the defaults.  Names are case-insensitive.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::{AuthConnector, DEFAULT_AUTH_HOST, PLAIN_PORT, TLS_PORT};
use crate::editor::DEFAULT_TIMEOUT;
use crate::session::FrontEnd;
use crate::tls;

pub const DEFAULT_PASSWORD_ENV: &str = "SGE_PASSWORD";

#[derive(Debug, Default)]
pub struct Settings {
    vars: HashMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or overwrite) a value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name)?.trim().parse().ok()
    }

    /// `1`/`on`/`yes`/`true` or `0`/`off`/`no`/`false`.
    pub fn get_flag(&self, name: &str) -> Option<bool> {
        match self.get(name)?.trim().to_ascii_lowercase().as_str() {
            "1" | "on" | "yes" | "true" => Some(true),
            "0" | "off" | "no" | "false" => Some(false),
            _ => None,
        }
    }

    pub fn unset(&mut self, name: &str) -> bool {
        self.vars.remove(&name.to_ascii_lowercase()).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    // ── Typed accessors ───────────────────────────────────────────────────────

    pub fn auth_host(&self) -> &str {
        self.get("auth_host").unwrap_or(DEFAULT_AUTH_HOST)
    }

    pub fn use_tls(&self) -> bool {
        self.get_flag("tls").unwrap_or(true)
    }

    /// Explicit `auth_port`, else the default for the chosen transport.
    pub fn auth_port(&self) -> u16 {
        self.get_int("auth_port")
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(if self.use_tls() { TLS_PORT } else { PLAIN_PORT })
    }

    /// The configured pinned key, if it is valid hex.
    pub fn pinned_key(&self) -> Option<Vec<u8>> {
        tls::parse_hex(self.get("pinned_key")?)
    }

    /// How to reach the login server.  `Err` names the problem when TLS is
    /// on but no usable key is configured.
    pub fn connector(&self) -> Result<AuthConnector, String> {
        if !self.use_tls() {
            return Ok(AuthConnector::Plain);
        }
        match self.pinned_key() {
            Some(pinned_key) => Ok(AuthConnector::Tls { pinned_key }),
            None if self.contains("pinned_key") => Err("pinned_key is not valid hex".into()),
            None => Err("tls is on but no pinned_key is set".into()),
        }
    }

    pub fn front_end(&self) -> Result<FrontEnd, String> {
        self.get("frontend").map_or(Ok(FrontEnd::default()), str::parse)
    }

    /// Editor inactivity timeout; `timeout` is in seconds.
    pub fn timeout(&self) -> Duration {
        self.get_int("timeout")
            .and_then(|s| u64::try_from(s).ok())
            .filter(|&s| s > 0)
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs)
    }

    pub fn logfile(&self) -> Option<PathBuf> {
        self.get("logfile").map(PathBuf::from)
    }

    /// Name of the environment variable holding the password.
    pub fn password_env(&self) -> &str {
        self.get("password_env").unwrap_or(DEFAULT_PASSWORD_ENV)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
