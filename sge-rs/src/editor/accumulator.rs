//! `\r\n` line accumulator for script-editor output.
//!
//! Editor output arrives as arbitrary text chunks.  [`LineAccumulator::push`]
//! returns each completed line exactly once, in order, regardless of how the
//! chunks were cut.  The unterminated tail stays visible through
//! [`LineAccumulator::peek`], which is how the bare `Edt:` prompt (never
//! followed by a newline) is spotted.

const DELIM: &str = "\r\n";

#[derive(Debug, Default)]
pub struct LineAccumulator {
    buf: String,
    /// Byte offset before which no delimiter can start.
    scan_from: usize,
}

impl LineAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text` and return the lines it completed, delimiters stripped.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buf.push_str(text);

        let mut lines = Vec::new();
        let mut line_start = 0;
        let mut search = self.scan_from;
        while let Some(pos) = self.buf[search..].find(DELIM) {
            let end = search + pos;
            lines.push(self.buf[line_start..end].to_owned());
            line_start = end + DELIM.len();
            search = line_start;
        }

        self.buf.drain(..line_start);
        // A lone trailing '\r' may be the first half of the next delimiter.
        self.scan_from = if self.buf.ends_with('\r') { self.buf.len() - 1 } else { self.buf.len() };
        lines
    }

    /// The current unterminated tail.
    pub fn peek(&self) -> &str {
        &self.buf
    }

    /// Discard the unterminated tail.
    pub fn flush(&mut self) {
        self.buf.clear();
        self.scan_from = 0;
    }
}
