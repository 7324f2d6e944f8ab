//! Command-line argument parsing.
//!
//! Usage:
//!   sge [-f<file>] [-d] [-t<secs>] <profile> <command> [args]
//!   sge [-f<file>] profiles
//!
//! Commands:
//!   games                    list the account's games and access levels
//!   check <n>                show a script's details
//!   date <n>                 show a script's modification time
//!   get <n|verb> [file]      download a script (stdout if no file)
//!   put <n|verb> <file>      upload and compile a script

use std::path::PathBuf;

use directories::{BaseDirs, ProjectDirs};

use crate::editor::ScriptTarget;

pub const USAGE: &str = "Usage: sge [-f<file>] [-d] [-t<secs>] <profile> <command> [args]\n       sge [-f<file>] profiles";

// ── Public types ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct CliArgs {
    pub config: ConfigFile,
    /// Debug logging (`-d`).
    pub debug: bool,
    /// Editor timeout override in seconds (`-t<secs>`).
    pub timeout: Option<u64>,
    /// Profile to log in with; `None` only for [`Command::Profiles`].
    pub profile: Option<String>,
    pub command: Command,
}

#[derive(Debug, Default)]
pub enum ConfigFile {
    /// Search the standard locations (default).
    #[default]
    Search,
    /// `-f<file>`: load this file only.
    Explicit(PathBuf),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub enum Command {
    /// List configured profiles without logging in.
    #[default]
    Profiles,
    Games,
    Check(u32),
    Date(u32),
    Get { target: ScriptTarget, file: Option<PathBuf> },
    Put { target: ScriptTarget, file: PathBuf },
}

// ── Parsing ───────────────────────────────────────────────────────────────────

pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(&raw[1..])
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut positional: Vec<String> = Vec::new();
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        if arg == "--" {
            positional.extend(argv[i + 1..].iter().cloned());
            break;
        }
        if !arg.starts_with('-') || arg == "-" {
            positional.push(arg.to_owned());
            i += 1;
            continue;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'd' => args.debug = true,

                // -f<file> or -f <file>
                'f' => {
                    let file = flag_value(&chars, &mut j, argv, &mut i)
                        .ok_or("-f requires a file argument")?;
                    args.config = ConfigFile::Explicit(PathBuf::from(file));
                }

                // -t<secs> or -t <secs>
                't' => {
                    let secs = flag_value(&chars, &mut j, argv, &mut i)
                        .ok_or("-t requires a number of seconds")?;
                    let secs: u64 = secs.parse().map_err(|_| format!("invalid timeout: {secs}"))?;
                    if secs == 0 {
                        return Err("timeout must be at least one second".to_owned());
                    }
                    args.timeout = Some(secs);
                }

                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    if positional.len() == 1 && positional[0] == "profiles" {
        return Ok(args);
    }
    let mut positional = positional.into_iter();
    let profile = positional.next().ok_or("missing profile name")?;
    let name = positional.next().ok_or("missing command")?;
    let rest: Vec<String> = positional.collect();
    args.command = parse_command(&name, &rest)?;
    args.profile = Some(profile);
    Ok(args)
}

/// The rest of the flag cluster, or the next argument.
fn flag_value(chars: &[char], j: &mut usize, argv: &[String], i: &mut usize) -> Option<String> {
    if *j + 1 < chars.len() {
        let s: String = chars[*j + 1..].iter().collect();
        *j = chars.len();
        Some(s)
    } else if *i + 1 < argv.len() {
        *i += 1;
        Some(argv[*i].clone())
    } else {
        None
    }
}

fn script_number(arg: Option<&String>, command: &str) -> Result<u32, String> {
    let arg = arg.ok_or_else(|| format!("{command}: missing script number"))?;
    arg.parse().map_err(|_| format!("{command}: invalid script number: {arg}"))
}

fn parse_command(name: &str, rest: &[String]) -> Result<Command, String> {
    let max_args = match name {
        "games" => 0,
        "check" | "date" => 1,
        "get" | "put" => 2,
        other => return Err(format!("unknown command: {other}")),
    };
    if rest.len() > max_args {
        return Err(format!("{name}: too many arguments ({})", rest.len()));
    }

    let target = |command: &str| -> Result<ScriptTarget, String> {
        rest.first()
            .ok_or_else(|| format!("{command}: missing script number or verb"))?
            .parse()
    };

    Ok(match name {
        "games" => Command::Games,
        "check" => Command::Check(script_number(rest.first(), name)?),
        "date" => Command::Date(script_number(rest.first(), name)?),
        "get" => Command::Get { target: target(name)?, file: rest.get(1).map(PathBuf::from) },
        _ => Command::Put {
            target: target(name)?,
            file: rest.get(1).map(PathBuf::from).ok_or("put: missing file")?,
        },
    })
}

// ── Path helpers ──────────────────────────────────────────────────────────────

/// Candidate config files in search order.
pub fn config_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(p) = std::env::var_os("SGE_CONFIG") {
        paths.push(PathBuf::from(p));
    }
    if let Some(dirs) = ProjectDirs::from("", "", "sge") {
        paths.push(dirs.config_dir().join("sgerc"));
    }
    if let Some(base) = BaseDirs::new() {
        paths.push(base.home_dir().join(".sgerc"));
    }
    paths.push(PathBuf::from("./.sgerc"));
    paths
}

/// The first existing config file, if any.
pub fn find_user_config() -> Option<PathBuf> {
    config_candidates().into_iter().find(|p| p.exists())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
