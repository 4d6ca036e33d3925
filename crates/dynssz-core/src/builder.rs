//! Minimal indent-aware source accumulator.
//!
//! The emitters build target source by appending lines at the current indent
//! level. This is intentionally bare: the control structure of the walkers is
//! the readable artifact, and a templating layer would bury it.

/// Builds source text line by line, tracking the current indent level.
#[derive(Debug, Clone, Default)]
pub struct CodeBuilder {
    out: String,
    indent: usize,
}

const INDENT: &str = "    ";

impl CodeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line at the current indent. An empty string produces a
    /// blank line with no trailing spaces.
    pub fn line(&mut self, s: impl AsRef<str>) {
        let s = s.as_ref();
        if s.is_empty() {
            self.out.push('\n');
            return;
        }
        for _ in 0..self.indent {
            self.out.push_str(INDENT);
        }
        self.out.push_str(s);
        self.out.push('\n');
    }

    /// Append a blank line.
    pub fn blank(&mut self) {
        self.out.push('\n');
    }

    /// Append pre-rendered multi-line text, re-indenting every non-empty
    /// line to the current level. Relative indentation inside `text` is
    /// preserved.
    pub fn lines(&mut self, text: &str) {
        for l in text.lines() {
            self.line(l);
        }
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        debug_assert!(self.indent > 0, "unbalanced dedent");
        self.indent = self.indent.saturating_sub(1);
    }

    /// `line(open)` followed by `indent()`. Pairs with [`CodeBuilder::close`].
    pub fn open(&mut self, open: impl AsRef<str>) {
        self.line(open);
        self.indent();
    }

    /// `dedent()` followed by `line(close)`.
    pub fn close(&mut self, close: impl AsRef<str>) {
        self.dedent();
        self.line(close);
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub fn finish(self) -> String {
        self.out
    }
}
