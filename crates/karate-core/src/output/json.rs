//! Multi-line JSON body accumulation.

use serde_json::Value;

/// Collects the lines of a JSON body until they parse.
///
/// Becomes active on a trigger line and inactive once the buffer parses or
/// a non-JSON line forces a flush.
#[derive(Debug, Default)]
pub struct JsonAccumulator {
    active: bool,
    buffer: String,
}

impl JsonAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Enter accumulation mode with an empty buffer.
    pub fn start(&mut self) {
        self.active = true;
        self.buffer.clear();
    }

    /// Append a line; returns the pretty-printed body once the buffer parses.
    pub fn push(&mut self, line: &str) -> Option<String> {
        self.buffer.push_str(line);
        self.buffer.push('\n');

        let value = parse(&self.buffer)?;
        self.active = false;
        self.buffer.clear();
        Some(pretty(&value))
    }

    /// Deactivate and return whatever was buffered, pretty if it parses.
    pub fn flush(&mut self) -> Option<String> {
        self.active = false;
        let buffered = std::mem::take(&mut self.buffer);
        if buffered.trim().is_empty() {
            return None;
        }
        Some(format_json(&buffered))
    }
}

fn parse(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    let unquoted = trimmed
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(trimmed);
    serde_json::from_str(unquoted).ok()
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

/// Pretty-print `text` if it is JSON (optionally single-quoted), else return
/// it trimmed.
pub fn format_json(text: &str) -> String {
    match parse(text) {
        Some(value) => pretty(&value),
        None => text.trim().to_string(),
    }
}
