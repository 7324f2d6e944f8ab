//! Classification of script-editor output lines.
//!
//! Each inbound line is parsed into at most one variant of [`DetailLine`]
//! (script listing and modify replies) or [`CompileLine`] (upload and compile
//! replies).  Lines that match nothing become `Other` and are ignored by the
//! operations.
//!
//! Recognised shapes:
//!
//! | Line | Variant |
//! |------|---------|
//! | `Name: healer` (also `Desc`, `Owner`, `Modifier`, `New`, `Path`, `Lines`) | [`DetailLine::Field`] |
//! | `Last modified on Tue Jun 14 09:22:08 2022` | [`DetailLine::LastModified`] |
//! | `Verb 'heal' not found.` | [`DetailLine::VerbNotFound`] |
//! | `Script #500 has not been created yet.` | [`DetailLine::NotCreated`] |
//! | `Script #500 is a verb, use /mv heal instead.` | [`DetailLine::IsVerb`] |
//! | `READY FOR ASCII UPLOAD` | [`CompileLine::Ready`] |
//! | `Compiling: script 500 [/scripts/heal]` | [`CompileLine::Compiling`] |
//! | `12 : missing ')'` | [`CompileLine::Diagnostic`] |
//! | `Compile OK.  0 Warnings.  Size: 42 bytes (of 9999 available)` | [`CompileLine::CompileOk`] |
//! | `Compile Failed w/2 errors and 1 warnings.` | [`CompileLine::CompileFailed`] |
//! | `Script compiled successfully.` | [`CompileLine::CompiledAlt`] |
//! | `*** Upload aborted ***` | [`CompileLine::Aborted`] |
//! | `Line too long (line 7)` | [`CompileLine::LineTooLong`] |

use std::sync::OnceLock;

use chrono::NaiveDateTime;
use regex::Regex;

/// The editor prompt.  Sent without a trailing newline.
pub const EDITOR_PROMPT: &str = "Edt:";

const TIMESTAMP_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

struct Patterns {
    field: Regex,
    last_modified: Regex,
    verb_not_found: Regex,
    not_created: Regex,
    is_verb: Regex,
    compiling: Regex,
    compile_ok: Regex,
    compile_failed: Regex,
    compiled_alt: Regex,
    aborted: Regex,
    line_too_long: Regex,
    diagnostic: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let re = |p: &str| Regex::new(p).expect("editor line pattern");
        Patterns {
            field: re(r"(?i)^\s*(name|desc|owner|modifier|new|path|lines)\s*:\s*(.*?)\s*$"),
            last_modified: re(
                r"(?i)^\s*last\s+modified(?:\s+on|:)?\s+([a-z]{3}\s+[a-z]{3}\s+\d{1,2}\s+\d{1,2}:\d{2}:\d{2}\s+\d{4})\s*$",
            ),
            verb_not_found: re(r"(?i)\bverb\s+'?([^'\s]*)'?\s+(?:was\s+)?not\s+found"),
            not_created: re(r"(?i)\bscript\s+#?(\d+)\s+(?:has\s+)?not\s+(?:yet\s+)?(?:been\s+)?created"),
            is_verb: re(r"(?i)\bscript\s+#?(\d+)\s+is\s+a\s+verb,?\s+use\s+(.+?)\s+instead"),
            compiling: re(r"(?i)^\s*compiling:?\s+script\s+#?(\d+)\s*\[([^\]]*)\]"),
            compile_ok: re(r"(?i)^\s*compile\s+ok\.\s*(\d+)\s+warnings?\.\s*size:\s*(\d+)\s+bytes"),
            compile_failed: re(r"(?i)^\s*compile\s+failed\s+w/\s*(\d+)\s+errors?\s+and\s+(\d+)\s+warnings?"),
            compiled_alt: re(r"(?i)^\s*(?:script\s+)?compiled\s+(?:ok|successfully)"),
            aborted: re(r"(?i)^\s*(?:\*+\s*)?(?:upload\s+|compile\s+)?aborted"),
            line_too_long: re(r"(?i)\bline\s+too\s+long"),
            diagnostic: re(r"^\s*(\d+)\s*:\s*(.+?)\s*$"),
        }
    })
}

fn number<T: std::str::FromStr + Default>(s: &str) -> T {
    s.parse().unwrap_or_default()
}

/// Parse `Tue Jun 14 09:22:08 2022` (runs of spaces allowed).
pub fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
    NaiveDateTime::parse_from_str(&normalized, TIMESTAMP_FORMAT).ok()
}

/// Whether the unterminated tail is the editor prompt.
pub fn is_prompt(tail: &str) -> bool {
    tail.trim_end().ends_with(EDITOR_PROMPT)
}

// ── Script details ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailField {
    Name(String),
    Desc(String),
    Owner(String),
    Modifier(String),
    New(bool),
    Path(String),
    Lines(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetailLine {
    Field(DetailField),
    LastModified(NaiveDateTime),
    VerbNotFound(String),
    NotCreated(u32),
    /// The server names the command to use instead.
    IsVerb { script: u32, command: String },
    Other,
}

impl DetailLine {
    pub fn parse(line: &str) -> Self {
        let p = patterns();

        if let Some(c) = p.last_modified.captures(line) {
            if let Some(ts) = parse_timestamp(&c[1]) {
                return DetailLine::LastModified(ts);
            }
        }
        if let Some(c) = p.is_verb.captures(line) {
            return DetailLine::IsVerb { script: number(&c[1]), command: c[2].to_owned() };
        }
        if let Some(c) = p.verb_not_found.captures(line) {
            return DetailLine::VerbNotFound(c[1].to_owned());
        }
        if let Some(c) = p.not_created.captures(line) {
            return DetailLine::NotCreated(number(&c[1]));
        }
        if let Some(c) = p.field.captures(line) {
            let value = c[2].to_owned();
            let field = match c[1].to_ascii_lowercase().as_str() {
                "name" => DetailField::Name(value),
                "desc" => DetailField::Desc(value),
                "owner" => DetailField::Owner(value),
                "modifier" => DetailField::Modifier(value),
                "new" => DetailField::New(matches!(
                    value.to_ascii_lowercase().as_str(),
                    "y" | "yes" | "true" | "1"
                )),
                "path" => DetailField::Path(value),
                _ => DetailField::Lines(number(&value)),
            };
            return DetailLine::Field(field);
        }
        DetailLine::Other
    }
}

// ── Upload / compile ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileLine {
    Ready,
    Compiling { script: u32, path: String },
    Diagnostic { line: u32, message: String },
    CompileOk { warnings: u32, bytes: u32 },
    CompileFailed { errors: u32, warnings: u32 },
    CompiledAlt,
    Aborted,
    LineTooLong(String),
    Other,
}

impl CompileLine {
    pub fn parse(line: &str) -> Self {
        let p = patterns();

        if line.contains("READY FOR ASCII UPLOAD") {
            return CompileLine::Ready;
        }
        if let Some(c) = p.compiling.captures(line) {
            return CompileLine::Compiling { script: number(&c[1]), path: c[2].trim().to_owned() };
        }
        if let Some(c) = p.compile_ok.captures(line) {
            return CompileLine::CompileOk { warnings: number(&c[1]), bytes: number(&c[2]) };
        }
        if let Some(c) = p.compile_failed.captures(line) {
            return CompileLine::CompileFailed { errors: number(&c[1]), warnings: number(&c[2]) };
        }
        if p.compiled_alt.is_match(line) {
            return CompileLine::CompiledAlt;
        }
        if p.aborted.is_match(line) {
            return CompileLine::Aborted;
        }
        if p.line_too_long.is_match(line) {
            return CompileLine::LineTooLong(line.trim().to_owned());
        }
        if let Some(c) = p.diagnostic.captures(line) {
            return CompileLine::Diagnostic { line: number(&c[1]), message: c[2].to_owned() };
        }
        CompileLine::Other
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
