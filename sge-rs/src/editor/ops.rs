//! Script-editor operations as pure line-driven state machines.
//!
//! An operation never touches the session directly.  [`EditOp::start`] and
//! the two event hooks push [`Outbound`] commands into an outbox and report a
//! [`Flow`]; the engine in the parent module owns the I/O, the timeout and
//! the prompt detection.

use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::debug;

use super::lines::{CompileLine, DetailField, DetailLine};

// ── Results ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("no reply from the script editor within {0:?}")]
    Timeout(std::time::Duration),
    #[error("verb '{0}' not found")]
    VerbNotFound(String),
    #[error("script #{0} has not been created")]
    NotCreated(u32),
    #[error("upload rejected: {0}")]
    LineTooLong(String),
    #[error("script editor: {0}")]
    Server(String),
    #[error("game session closed")]
    SessionClosed,
    #[error("missed {0} chunks of server output")]
    Lagged(u64),
}

/// What the editor reports about a script.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptProperties {
    pub last_modified: Option<NaiveDateTime>,
    pub name: String,
    pub desc: String,
    pub owner: String,
    pub modifier: String,
    pub is_new: bool,
    pub path: String,
    pub lines: u32,
}

impl ScriptProperties {
    fn apply(&mut self, field: DetailField) {
        match field {
            DetailField::Name(v) => self.name = v,
            DetailField::Desc(v) => self.desc = v,
            DetailField::Owner(v) => self.owner = v,
            DetailField::Modifier(v) => self.modifier = v,
            DetailField::New(v) => self.is_new = v,
            DetailField::Path(v) => self.path = v,
            DetailField::Lines(v) => self.lines = v,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompileStatus {
    #[default]
    Unknown,
    Uploading,
    Uploaded,
    Compiling,
    Compiled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileDiagnostic {
    pub line: u32,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptCompileResult {
    pub status: CompileStatus,
    pub script: Option<u32>,
    pub path: String,
    pub bytes: u32,
    pub errors: u32,
    pub warnings: u32,
    pub error_list: Vec<CompileDiagnostic>,
}

/// A script addressed by number (`/ms 500`) or by verb (`/mv heal`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScriptTarget {
    Number(u32),
    Verb(String),
}

impl ScriptTarget {
    pub fn modify_command(&self) -> String {
        match self {
            ScriptTarget::Number(n) => format!("/ms {n}"),
            ScriptTarget::Verb(v) => format!("/mv {v}"),
        }
    }
}

impl From<u32> for ScriptTarget {
    fn from(n: u32) -> Self {
        ScriptTarget::Number(n)
    }
}

impl FromStr for ScriptTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err("empty script name".into());
        }
        if s.bytes().all(|b| b.is_ascii_digit()) {
            return s.parse().map(ScriptTarget::Number).map_err(|e| format!("{s}: {e}"));
        }
        if s.contains(char::is_whitespace) {
            return Err(format!("verb may not contain spaces: {s:?}"));
        }
        Ok(ScriptTarget::Verb(s.to_owned()))
    }
}

impl fmt::Display for ScriptTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptTarget::Number(n) => write!(f, "#{n}"),
            ScriptTarget::Verb(v) => f.write_str(v),
        }
    }
}

// ── Machine interface ─────────────────────────────────────────────────────────

/// A command for the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub text: String,
    pub echo: bool,
}

impl Outbound {
    pub fn echoed(text: impl Into<String>) -> Self {
        Self { text: text.into(), echo: true }
    }

    pub fn quiet(text: impl Into<String>) -> Self {
        Self { text: text.into(), echo: false }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Flow<T> {
    Continue,
    Done(T),
    Fail(ScriptError),
}

pub trait EditOp {
    type Output;

    /// Name used in log output.
    fn name(&self) -> &'static str;

    fn start(&mut self, out: &mut Vec<Outbound>);

    fn on_line(&mut self, line: &str, out: &mut Vec<Outbound>) -> Flow<Self::Output>;

    /// Called when the unterminated tail ends with `Edt:`.
    fn on_prompt(&mut self, _out: &mut Vec<Outbound>) -> Flow<Self::Output> {
        Flow::Continue
    }
}

// ── check ─────────────────────────────────────────────────────────────────────

/// `/ss <n>`: resolves on the last-modified line.
#[derive(Debug)]
pub struct CheckOp {
    script: u32,
    props: ScriptProperties,
}

impl CheckOp {
    pub fn new(script: u32) -> Self {
        Self { script, props: ScriptProperties::default() }
    }
}

impl EditOp for CheckOp {
    type Output = ScriptProperties;

    fn name(&self) -> &'static str {
        "check"
    }

    fn start(&mut self, out: &mut Vec<Outbound>) {
        out.push(Outbound::echoed(format!("/ss {}", self.script)));
    }

    fn on_line(&mut self, line: &str, _out: &mut Vec<Outbound>) -> Flow<ScriptProperties> {
        match DetailLine::parse(line) {
            DetailLine::Field(f) => self.props.apply(f),
            DetailLine::LastModified(ts) => {
                self.props.last_modified = Some(ts);
                return Flow::Done(std::mem::take(&mut self.props));
            }
            DetailLine::VerbNotFound(v) => return Flow::Fail(ScriptError::VerbNotFound(v)),
            DetailLine::NotCreated(n) => return Flow::Fail(ScriptError::NotCreated(n)),
            DetailLine::IsVerb { .. } => {
                return Flow::Fail(ScriptError::Server(line.trim().to_owned()))
            }
            DetailLine::Other => {}
        }
        Flow::Continue
    }
}

// ── modify ────────────────────────────────────────────────────────────────────

/// `/ms <n>` or `/mv <verb>`: opens the script in the editor and resolves at
/// the `Edt:` prompt.
#[derive(Debug)]
pub struct ModifyOp {
    target: ScriptTarget,
    props: ScriptProperties,
    redirected: bool,
}

impl ModifyOp {
    pub fn new(target: ScriptTarget) -> Self {
        Self { target, props: ScriptProperties::default(), redirected: false }
    }
}

impl EditOp for ModifyOp {
    type Output = ScriptProperties;

    fn name(&self) -> &'static str {
        "modify"
    }

    fn start(&mut self, out: &mut Vec<Outbound>) {
        out.push(Outbound::echoed(self.target.modify_command()));
    }

    fn on_line(&mut self, line: &str, out: &mut Vec<Outbound>) -> Flow<ScriptProperties> {
        match DetailLine::parse(line) {
            DetailLine::Field(f) => self.props.apply(f),
            DetailLine::LastModified(ts) => self.props.last_modified = Some(ts),
            DetailLine::VerbNotFound(v) => return Flow::Fail(ScriptError::VerbNotFound(v)),
            DetailLine::NotCreated(n) => return Flow::Fail(ScriptError::NotCreated(n)),
            DetailLine::IsVerb { script, command } => {
                if self.redirected {
                    return Flow::Fail(ScriptError::Server(line.trim().to_owned()));
                }
                debug!(script, %command, "script is a verb, reissuing");
                self.redirected = true;
                out.push(Outbound::echoed(command));
            }
            DetailLine::Other => {}
        }
        Flow::Continue
    }

    fn on_prompt(&mut self, _out: &mut Vec<Outbound>) -> Flow<ScriptProperties> {
        Flow::Done(std::mem::take(&mut self.props))
    }
}

// ── capture ───────────────────────────────────────────────────────────────────

/// `P`: collects the listing up to the next prompt, then leaves with `Q`.
#[derive(Debug, Default)]
pub struct CaptureOp {
    lines: Vec<String>,
}

impl CaptureOp {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EditOp for CaptureOp {
    type Output = String;

    fn name(&self) -> &'static str {
        "capture"
    }

    fn start(&mut self, out: &mut Vec<Outbound>) {
        out.push(Outbound::quiet("P"));
    }

    fn on_line(&mut self, line: &str, _out: &mut Vec<Outbound>) -> Flow<String> {
        self.lines.push(line.to_owned());
        Flow::Continue
    }

    fn on_prompt(&mut self, out: &mut Vec<Outbound>) -> Flow<String> {
        out.push(Outbound::quiet("Q"));
        Flow::Done(std::mem::take(&mut self.lines).join("\r\n"))
    }
}

// ── send ──────────────────────────────────────────────────────────────────────

/// `Z`, the source lines, `G`: uploads and compiles the open script.
#[derive(Debug)]
pub struct SendOp {
    source: Vec<String>,
    result: ScriptCompileResult,
}

impl SendOp {
    pub fn new(source: Vec<String>) -> Self {
        Self { source, result: ScriptCompileResult::default() }
    }

    fn finish(&mut self) -> ScriptCompileResult {
        std::mem::take(&mut self.result)
    }
}

impl EditOp for SendOp {
    type Output = ScriptCompileResult;

    fn name(&self) -> &'static str {
        "send"
    }

    fn start(&mut self, out: &mut Vec<Outbound>) {
        out.push(Outbound::quiet("Z"));
    }

    fn on_line(&mut self, line: &str, out: &mut Vec<Outbound>) -> Flow<ScriptCompileResult> {
        let r = &mut self.result;
        match CompileLine::parse(line) {
            CompileLine::Ready if r.status == CompileStatus::Unknown => {
                r.status = CompileStatus::Uploading;
                out.extend(self.source.iter().map(|l| Outbound::quiet(l.as_str())));
                r.status = CompileStatus::Uploaded;
                debug!(lines = self.source.len(), "script uploaded");
            }
            CompileLine::Ready => {}
            CompileLine::Compiling { script, path } => {
                r.status = CompileStatus::Compiling;
                r.script = Some(script);
                r.path = path;
            }
            CompileLine::Diagnostic { line, message }
                if matches!(r.status, CompileStatus::Uploaded | CompileStatus::Compiling) =>
            {
                r.error_list.push(CompileDiagnostic { line, message });
            }
            CompileLine::Diagnostic { .. } => {}
            CompileLine::CompileOk { warnings, bytes } => {
                r.status = CompileStatus::Compiled;
                r.warnings = warnings;
                r.bytes = bytes;
            }
            CompileLine::CompileFailed { errors, warnings } => {
                r.status = CompileStatus::Failed;
                r.errors = errors;
                r.warnings = warnings;
            }
            CompileLine::CompiledAlt => {
                r.status = CompileStatus::Compiled;
                return Flow::Done(self.finish());
            }
            CompileLine::Aborted => return Flow::Done(self.finish()),
            CompileLine::LineTooLong(text) => return Flow::Fail(ScriptError::LineTooLong(text)),
            CompileLine::Other => {}
        }
        Flow::Continue
    }

    fn on_prompt(&mut self, out: &mut Vec<Outbound>) -> Flow<ScriptCompileResult> {
        match self.result.status {
            CompileStatus::Uploaded => {
                out.push(Outbound::quiet("G"));
                Flow::Continue
            }
            CompileStatus::Compiled | CompileStatus::Failed => {
                out.push(Outbound::quiet("Q"));
                Flow::Done(self.finish())
            }
            _ => Flow::Continue,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(out: &[Outbound]) -> Vec<&str> {
        out.iter().map(|o| o.text.as_str()).collect()
    }

    #[test]
    fn target_parsing() {
        assert_eq!("500".parse::<ScriptTarget>(), Ok(ScriptTarget::Number(500)));
        assert_eq!("heal".parse::<ScriptTarget>(), Ok(ScriptTarget::Verb("heal".into())));
        assert!("".parse::<ScriptTarget>().is_err());
        assert!("two words".parse::<ScriptTarget>().is_err());
        assert_eq!(ScriptTarget::Verb("heal".into()).modify_command(), "/mv heal");
        assert_eq!(ScriptTarget::Number(9).modify_command(), "/ms 9");
    }

    #[test]
    fn check_resolves_on_timestamp() {
        let mut op = CheckOp::new(500);
        let mut out = Vec::new();
        op.start(&mut out);
        assert_eq!(texts(&out), ["/ss 500"]);
        assert!(out[0].echo);

        assert_eq!(op.on_line("Name: healer", &mut out), Flow::Continue);
        assert_eq!(op.on_line("Owner: BOB", &mut out), Flow::Continue);
        let Flow::Done(props) = op.on_line("Last modified on Tue Jun 14 09:22:08 2022", &mut out)
        else {
            panic!("check did not resolve");
        };
        assert_eq!(props.name, "healer");
        assert_eq!(props.owner, "BOB");
        assert!(props.last_modified.is_some());
    }

    #[test]
    fn check_rejects_on_missing_script() {
        let mut op = CheckOp::new(7);
        let mut out = Vec::new();
        assert_eq!(
            op.on_line("Script #7 has not been created yet.", &mut out),
            Flow::Fail(ScriptError::NotCreated(7))
        );
    }

    #[test]
    fn modify_follows_verb_redirect_once() {
        let mut op = ModifyOp::new(ScriptTarget::Number(77));
        let mut out = Vec::new();
        op.start(&mut out);
        let line = "Script #77 is a verb, use /mv heal instead.";
        assert_eq!(op.on_line(line, &mut out), Flow::Continue);
        assert_eq!(texts(&out), ["/ms 77", "/mv heal"]);
        assert!(matches!(op.on_line(line, &mut out), Flow::Fail(ScriptError::Server(_))));
    }

    #[test]
    fn modify_resolves_at_prompt() {
        let mut op = ModifyOp::new(ScriptTarget::Verb("heal".into()));
        let mut out = Vec::new();
        op.on_line("Name: heal", &mut out);
        op.on_line("Lines: 12", &mut out);
        let Flow::Done(props) = op.on_prompt(&mut out) else { panic!("modify did not resolve") };
        assert_eq!(props.lines, 12);
        assert_eq!(props.last_modified, None);
    }

    #[test]
    fn modify_unknown_verb() {
        let mut op = ModifyOp::new(ScriptTarget::Verb("nope".into()));
        let mut out = Vec::new();
        assert_eq!(
            op.on_line("Verb 'nope' not found.", &mut out),
            Flow::Fail(ScriptError::VerbNotFound("nope".into()))
        );
    }

    #[test]
    fn capture_joins_with_crlf_and_quits() {
        let mut op = CaptureOp::new();
        let mut out = Vec::new();
        op.start(&mut out);
        op.on_line("put hello", &mut out);
        op.on_line("", &mut out);
        op.on_line("exit", &mut out);
        assert_eq!(op.on_prompt(&mut out), Flow::Done("put hello\r\n\r\nexit".into()));
        assert_eq!(texts(&out), ["P", "Q"]);
    }

    #[test]
    fn send_uploads_and_compiles() {
        let mut op = SendOp::new(vec!["put hi".into(), "exit".into()]);
        let mut out = Vec::new();
        op.start(&mut out);
        op.on_line("READY FOR ASCII UPLOAD", &mut out);
        assert_eq!(op.on_prompt(&mut out), Flow::Continue);
        op.on_line("Compiling: script 500 [/scripts/heal]", &mut out);
        op.on_line("Compile OK.  0 Warnings.  Size: 42 bytes", &mut out);
        let Flow::Done(result) = op.on_prompt(&mut out) else { panic!("send did not resolve") };
        assert_eq!(texts(&out), ["Z", "put hi", "exit", "G", "Q"]);
        assert_eq!(result.status, CompileStatus::Compiled);
        assert_eq!(result.bytes, 42);
        assert_eq!(result.script, Some(500));
    }

    #[test]
    fn send_collects_diagnostics_on_failure() {
        let mut op = SendOp::new(vec!["bad".into()]);
        let mut out = Vec::new();
        op.on_line("READY FOR ASCII UPLOAD", &mut out);
        op.on_line("3 : undefined label", &mut out);
        op.on_line("9 : missing ')'", &mut out);
        op.on_line("Compile Failed w/2 errors and 1 warnings.", &mut out);
        let Flow::Done(result) = op.on_prompt(&mut out) else { panic!("send did not resolve") };
        assert_eq!(result.status, CompileStatus::Failed);
        assert_eq!((result.errors, result.warnings), (2, 1));
        assert_eq!(result.error_list.len(), 2);
        assert_eq!(result.error_list[1], CompileDiagnostic { line: 9, message: "missing ')'".into() });
        assert_eq!(out.last().map(|o| o.text.as_str()), Some("Q"));
    }

    #[test]
    fn send_abort_keeps_status_without_quit() {
        let mut op = SendOp::new(Vec::new());
        let mut out = Vec::new();
        op.on_line("READY FOR ASCII UPLOAD", &mut out);
        let Flow::Done(result) = op.on_line("*** Upload aborted ***", &mut out) else {
            panic!("abort did not resolve");
        };
        assert_eq!(result.status, CompileStatus::Uploaded);
        assert!(out.iter().all(|o| o.text != "Q"));
    }

    #[test]
    fn send_line_too_long_fails() {
        let mut op = SendOp::new(Vec::new());
        let mut out = Vec::new();
        assert!(matches!(
            op.on_line("Line too long (line 7)", &mut out),
            Flow::Fail(ScriptError::LineTooLong(_))
        ));
    }

    #[test]
    fn diagnostics_before_upload_are_ignored() {
        let mut op = SendOp::new(Vec::new());
        let mut out = Vec::new();
        op.on_line("10 : stray", &mut out);
        op.on_line("READY FOR ASCII UPLOAD", &mut out);
        let Flow::Done(result) = op.on_line("Script compiled successfully.", &mut out) else {
            panic!("send did not resolve");
        };
        assert_eq!(result.status, CompileStatus::Compiled);
        assert!(result.error_list.is_empty());
    }
}
