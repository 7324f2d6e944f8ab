//! `sgerc` configuration file parser.
//!
//! | Directive | Action |
//! |-----------|--------|
//! | `/addprofile [-s] [-T<frontend>] <name> <account> <game> <character>` | add/update a profile |
//! | `/set <name>=<value>` or `/set <name> <value>` | set a setting |
//! | Lines starting with `;` | comment, ignored |
//! | Any other `/command` | silently skipped |
//!
//! Passwords never live here; see [`Settings::password_env`].

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::auth::LoginMode;
use crate::profile::{Profile, ProfileStore};
use crate::session::FrontEnd;
use crate::settings::Settings;

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error on one line of a config file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Config {
    pub profiles: ProfileStore,
    pub settings: Settings,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse config text.  Returns the config and any errors on recognised
    /// directives; bad lines are skipped, not fatal.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with(';') {
                continue;
            }
            let Some(rest) = line.strip_prefix('/') else { continue };

            let (cmd, args_str) = rest
                .split_once(|c: char| c.is_ascii_whitespace())
                .unwrap_or((rest, ""));
            let tokens = split_args(args_str.trim());

            let outcome = match cmd {
                "addprofile" => parse_addprofile(&tokens).map(|p| {
                    config.profiles.upsert(p);
                }),
                "set" => parse_set(&tokens, &mut config.settings),
                other => {
                    debug!(line = lineno, command = other, "skipping unknown directive");
                    Ok(())
                }
            };
            if let Err(message) = outcome {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        (config, errors)
    }

    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }
}

// ── Argument tokenizer ────────────────────────────────────────────────────────

/// Whitespace-separated tokens; double quotes group, `\"` escapes inside them.
fn split_args(s: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_ascii_whitespace() && !in_quotes => {
                if !cur.is_empty() {
                    args.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        args.push(cur);
    }
    args
}

// ── /addprofile ───────────────────────────────────────────────────────────────

/// `-s` storm mode, `-T<frontend>` (attached or separate).  Flags combine:
/// `-sTwizard`.
fn parse_addprofile(tokens: &[String]) -> Result<Profile, String> {
    let mut mode = LoginMode::Play;
    let mut front_end = None;
    let mut positional = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        let tok = &tokens[i];
        if tok.starts_with('-') && tok.len() > 1 {
            let mut chars = tok[1..].chars();
            while let Some(ch) = chars.next() {
                match ch {
                    's' => mode = LoginMode::Storm,
                    'T' => {
                        let inline: String = chars.by_ref().collect();
                        let value = if inline.is_empty() {
                            i += 1;
                            tokens.get(i).cloned().ok_or("addprofile: -T requires a front end")?
                        } else {
                            inline
                        };
                        front_end = Some(value.parse::<FrontEnd>().map_err(|e| format!("addprofile: {e}"))?);
                    }
                    c => return Err(format!("addprofile: unknown flag -{c}")),
                }
            }
        } else {
            positional.push(tok.clone());
        }
        i += 1;
    }

    let [name, account, game, character] = positional.as_slice() else {
        return Err(format!(
            "addprofile: expected <name> <account> <game> <character>, got {} arguments",
            positional.len()
        ));
    };
    let mut profile = Profile::new(name, account, game, character);
    profile.mode = mode;
    profile.front_end = front_end;
    Ok(profile)
}

// ── /set ─────────────────────────────────────────────────────────────────────

fn parse_set(tokens: &[String], settings: &mut Settings) -> Result<(), String> {
    let Some(first) = tokens.first() else {
        return Err("/set: requires an argument".into());
    };

    let (name, value) = if let Some((name, value)) = first.split_once('=') {
        (name.to_owned(), value.to_owned())
    } else if tokens.len() >= 2 {
        (first.clone(), tokens[1..].join(" "))
    } else {
        return Err(format!("/set: missing value for '{first}'"));
    };

    if name.is_empty() {
        return Err("/set: setting name cannot be empty".into());
    }

    settings.set(name, value);
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
