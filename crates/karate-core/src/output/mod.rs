//! Streaming reducer for Karate runner output.
//!
//! Consumes stdout/stderr chunks in arrival order, reassembles lines across
//! chunk boundaries, classifies each line and derives the run verdict.
//! All work is synchronous; the caller owns the reducer and must feed it
//! from a single task so chunk order is preserved.
//!
//! Classification order for a stdout line (first match wins):
//! 1. strip ANSI sequences and whitespace, skip empty lines
//! 2. while a JSON body is open, JSON-looking lines are buffered; any other
//!    line flushes the buffer and falls through
//! 3. failure markers (`match failed`) fail the run
//! 4. step keywords
//! 5. request/response/print/log triggers open a JSON body
//! 6. scenario summary lines (a nonzero failed count fails the run)
//! 7. banner noise is dropped
//! 8. anything else is emitted verbatim

mod buffer;
mod json;
mod patterns;

pub use buffer::LineBuffer;
pub use json::{format_json, JsonAccumulator};
pub use patterns::{parse_summary, strip_ansi, Section};

use crate::types::{OutputMode, RunSummary, StderrPolicy, Verdict};
use std::fmt;

const RULE_WIDTH: usize = 80;

/// One unit of rendered runner output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputEvent {
    /// Text produced by the launcher itself (headers, command line).
    Banner(String),
    Step(String),
    Failure(String),
    /// Header announcing a request/response/print/log body.
    Section(Section),
    /// A (pretty-printed when parseable) JSON body.
    Json(String),
    Summary(String),
    Line(String),
    Stderr(String),
    /// Stderr text tolerated by [`StderrPolicy::IgnoreWarnings`].
    Warning(String),
    /// Closing banner.
    Verdict(Verdict),
}

impl OutputEvent {
    /// Whether the event starts its own visually separated block.
    pub fn is_block(&self) -> bool {
        matches!(
            self,
            Self::Step(_) | Self::Failure(_) | Self::Section(_) | Self::Summary(_) | Self::Verdict(_)
        )
    }
}

impl fmt::Display for OutputEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Banner(text) | Self::Json(text) | Self::Line(text) => f.write_str(text),
            Self::Step(line) => write!(f, "► {line}"),
            Self::Failure(line) => write!(f, "❌ {line}"),
            Self::Section(section) => f.write_str(section.title()),
            Self::Summary(line) => write!(f, "📊 {line}"),
            Self::Stderr(line) => write!(f, "⚠️ Error: {line}"),
            Self::Warning(line) => write!(f, "⚠️ {line}"),
            Self::Verdict(verdict) => {
                let rule = "=".repeat(RULE_WIDTH);
                let text = match verdict {
                    Verdict::Passed => "✅ Test Passed",
                    Verdict::Failed => "❌ Test Failed",
                };
                write!(f, "{rule}\n{text}\n{rule}")
            }
        }
    }
}

/// Destination for classified output.
pub trait OutputSink {
    fn emit(&mut self, event: OutputEvent);

    /// Reset the output surface before a new run.
    fn clear(&mut self) {}
}

impl OutputSink for Vec<OutputEvent> {
    fn emit(&mut self, event: OutputEvent) {
        self.push(event);
    }

    fn clear(&mut self) {
        Vec::clear(self);
    }
}

/// Reducer behaviour switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReducerOptions {
    pub mode: OutputMode,
    pub stderr_policy: StderrPolicy,
}

/// Result of a finished reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reduction {
    pub verdict: Verdict,
    pub exit_code: Option<i32>,
    /// Last summary line seen, if any.
    pub summary: Option<RunSummary>,
}

/// Stateful line classifier for one run.
#[derive(Debug, Default)]
pub struct OutputReducer {
    options: ReducerOptions,
    stdout: LineBuffer,
    stderr: LineBuffer,
    json: JsonAccumulator,
    failed: bool,
    summary: Option<RunSummary>,
}

impl OutputReducer {
    pub fn new(options: ReducerOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Feed a stdout chunk.
    pub fn push_stdout<S: OutputSink + ?Sized>(&mut self, chunk: &[u8], sink: &mut S) {
        for line in self.stdout.push(chunk) {
            self.stdout_line(&line, sink);
        }
    }

    /// Feed a stderr chunk.
    pub fn push_stderr<S: OutputSink + ?Sized>(&mut self, chunk: &[u8], sink: &mut S) {
        for line in self.stderr.push(chunk) {
            self.stderr_line(&line, sink);
        }
    }

    /// Whether a failure signal has been observed so far.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn summary(&self) -> Option<RunSummary> {
        self.summary
    }

    /// Flush buffered state and compute the verdict.
    ///
    /// `exit_code` is `None` when the process was killed by a signal.
    pub fn finish<S: OutputSink + ?Sized>(mut self, exit_code: Option<i32>, sink: &mut S) -> Reduction {
        if let Some(rest) = self.stdout.take_remainder() {
            self.stdout_line(&rest, sink);
        }
        if let Some(rest) = self.stderr.take_remainder() {
            self.stderr_line(&rest, sink);
        }
        if let Some(body) = self.json.flush() {
            sink.emit(OutputEvent::Json(body));
        }

        let verdict = if self.failed || exit_code != Some(0) {
            Verdict::Failed
        } else {
            Verdict::Passed
        };
        sink.emit(OutputEvent::Verdict(verdict));

        Reduction {
            verdict,
            exit_code,
            summary: self.summary,
        }
    }

    fn stdout_line<S: OutputSink + ?Sized>(&mut self, raw: &str, sink: &mut S) {
        let clean = strip_ansi(raw);
        let line = clean.trim();

        match self.options.mode {
            OutputMode::Extension => {
                if !line.is_empty() {
                    self.classify(line, sink);
                }
            }
            OutputMode::Logback => {
                if patterns::is_failure(line) {
                    self.failed = true;
                }
                if let Some(summary) = parse_summary(line) {
                    self.record_summary(summary);
                }
                sink.emit(OutputEvent::Line(raw.trim_end().to_string()));
            }
        }
    }

    fn classify<S: OutputSink + ?Sized>(&mut self, line: &str, sink: &mut S) {
        if self.json.is_active() {
            if patterns::looks_like_json(line) {
                if let Some(body) = self.json.push(line) {
                    sink.emit(OutputEvent::Json(body));
                }
                return;
            }
            if let Some(body) = self.json.flush() {
                sink.emit(OutputEvent::Json(body));
            }
        }

        if patterns::is_failure(line) {
            self.failed = true;
            sink.emit(OutputEvent::Failure(line.to_string()));
            return;
        }

        if patterns::is_step(line) {
            sink.emit(OutputEvent::Step(line.to_string()));
            return;
        }

        if let Some((section, inline)) = patterns::body_trigger(line) {
            sink.emit(OutputEvent::Section(section));
            self.json.start();
            if !inline.is_empty() {
                self.classify(inline, sink);
            }
            return;
        }

        if let Some(summary) = parse_summary(line) {
            self.record_summary(summary);
            sink.emit(OutputEvent::Summary(line.to_string()));
            return;
        }

        if patterns::is_noise(line) {
            return;
        }

        sink.emit(OutputEvent::Line(line.to_string()));
    }

    fn record_summary(&mut self, summary: RunSummary) {
        if summary.failed > 0 {
            self.failed = true;
        }
        self.summary = Some(summary);
    }

    fn stderr_line<S: OutputSink + ?Sized>(&mut self, raw: &str, sink: &mut S) {
        let clean = strip_ansi(raw);
        let line = clean.trim();
        if line.is_empty() {
            return;
        }

        if self.options.stderr_policy == StderrPolicy::IgnoreWarnings
            && patterns::is_benign_stderr(line)
        {
            sink.emit(OutputEvent::Warning(line.to_string()));
            return;
        }

        self.failed = true;
        sink.emit(OutputEvent::Stderr(line.to_string()));
    }
}
