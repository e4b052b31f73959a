//! Line predicates used by the output classifier.
//!
//! All functions expect a line that has already been stripped of ANSI
//! sequences and surrounding whitespace.

use crate::types::RunSummary;
use regex::Regex;
use std::sync::LazyLock;

static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("ANSI pattern is valid")
});

static SCENARIOS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bscenarios?\b:?\s*(\d+)|(\d+)\s+scenarios?\b").expect("scenarios pattern is valid")
});

static PASSED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bpassed\b:?\s*(\d+)|(\d+)\s+passed\b").expect("passed pattern is valid")
});

static FAILED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bfailed\b:?\s*(\d+)|(\d+)\s+failed\b").expect("failed pattern is valid")
});

const FAILURE_MARKERS: &[&str] = &["match failed", "assertion failed"];

const STEP_KEYWORDS: &[&str] = &["Given ", "When ", "Then ", "And ", "But ", "* "];

const NOISE: &[&str] = &["karate-summary", "HTML report:", "Karate version:"];

/// Kind of body dump announced by a trigger line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Request,
    Response,
    Print,
    Log,
}

impl Section {
    pub fn title(&self) -> &'static str {
        match self {
            Self::Request => "📤 Request:",
            Self::Response => "📥 Response:",
            Self::Print => "🖨️ Print Output:",
            Self::Log => "📝 Karate Log:",
        }
    }
}

/// Remove ANSI color and cursor escape sequences.
pub fn strip_ansi(line: &str) -> String {
    ANSI_RE.replace_all(line, "").into_owned()
}

pub fn is_failure(line: &str) -> bool {
    let lower = line.to_lowercase();
    FAILURE_MARKERS.iter().any(|m| lower.contains(m))
}

pub fn is_step(line: &str) -> bool {
    STEP_KEYWORDS.iter().any(|k| line.starts_with(k))
}

/// Detect a line announcing a request/response/print/log body.
///
/// Returns the section and any inline content following a print or log marker.
pub fn body_trigger(line: &str) -> Option<(Section, &str)> {
    if let Some(rest) = after(line, "[print]") {
        return Some((Section::Print, rest));
    }
    if let Some(rest) = after(line, "karate.log") {
        return Some((Section::Log, rest));
    }
    let lower = line.to_lowercase();
    if lower.contains("request:") {
        return Some((Section::Request, ""));
    }
    if lower.contains("response:") {
        return Some((Section::Response, ""));
    }
    None
}

fn after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    line.find(marker)
        .map(|idx| line[idx + marker.len()..].trim())
}

/// Whether a line can be part of a JSON body.
pub fn looks_like_json(line: &str) -> bool {
    const EDGES: &[char] = &['{', '}', '[', ']', '"'];
    line.starts_with(EDGES) || line.ends_with(EDGES)
}

/// Parse a scenario summary line such as
/// `scenarios:  2 | passed:  2 | failed:  0` or `2 scenarios, 0 failed`.
///
/// Both a scenario count and a failed count must be present.
pub fn parse_summary(line: &str) -> Option<RunSummary> {
    let scenarios = capture_count(&SCENARIOS_RE, line)?;
    let failed = capture_count(&FAILED_RE, line)?;
    Some(RunSummary {
        scenarios: Some(scenarios),
        passed: capture_count(&PASSED_RE, line),
        failed,
    })
}

fn capture_count(re: &Regex, line: &str) -> Option<u32> {
    let caps = re.captures(line)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .and_then(|m| m.as_str().parse().ok())
}

/// Boilerplate banners dropped from classified output.
pub fn is_noise(line: &str) -> bool {
    NOISE.iter().any(|n| line.contains(n)) || (line.len() >= 20 && line.chars().all(|c| c == '='))
}

/// Stderr lines that are informational rather than failures.
pub fn is_benign_stderr(line: &str) -> bool {
    line.starts_with("WARN") || line.starts_with("SLF4J:") || line.contains(" WARN ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_color_codes() {
        assert_eq!(strip_ansi("\u{1b}[32mGiven x\u{1b}[0m"), "Given x");
        assert_eq!(strip_ansi("\u{1b}[1;31merror\u{1b}[m"), "error");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn recognises_failures_and_steps() {
        assert!(is_failure("match failed at line 12"));
        assert!(is_failure("ASSERTION FAILED: expected 200"));
        assert!(!is_failure("all good"));

        assert!(is_step("Given url 'http://x'"));
        assert!(is_step("* def a = 1"));
        assert!(is_step("But nothing"));
        assert!(!is_step("Givenx"));
        assert!(!is_step("Scenario: login"));
    }

    #[test]
    fn body_triggers() {
        assert_eq!(
            body_trigger("13:00:00.000 DEBUG com.intuit.karate - request:"),
            Some((Section::Request, ""))
        );
        assert_eq!(body_trigger("Response:"), Some((Section::Response, "")));
        assert_eq!(
            body_trigger("INFO com.intuit.karate - [print] {\"a\":1}"),
            Some((Section::Print, "{\"a\":1}"))
        );
        assert_eq!(
            body_trigger("karate.log hello"),
            Some((Section::Log, "hello"))
        );
        assert_eq!(body_trigger("status 200"), None);
    }

    #[test]
    fn json_heuristic() {
        assert!(looks_like_json("{"));
        assert!(looks_like_json("\"a\": 1,"));
        assert!(looks_like_json("},"));
        assert!(looks_like_json("\"items\": ["));
        assert!(!looks_like_json("1 > GET http://x"));
        assert!(!looks_like_json("42,"));
    }

    #[test]
    fn parses_karate_summary_line() {
        let summary = parse_summary("scenarios:  3 | passed:  2 | failed:  1 | time: 1.2").unwrap();
        assert_eq!(summary.scenarios, Some(3));
        assert_eq!(summary.passed, Some(2));
        assert_eq!(summary.failed, 1);
    }

    #[test]
    fn parses_prose_summary_line() {
        let summary = parse_summary("2 scenarios, 0 failed").unwrap();
        assert_eq!(summary.scenarios, Some(2));
        assert_eq!(summary.passed, None);
        assert_eq!(summary.failed, 0);
    }

    #[test]
    fn summary_requires_both_counts() {
        assert!(parse_summary("features: 1 | skipped: 0").is_none());
        assert!(parse_summary("scenarios: 2").is_none());
        assert!(parse_summary("Scenario: login failed").is_none());
    }

    #[test]
    fn noise_filter() {
        assert!(is_noise("Karate version: 1.4.0"));
        assert!(is_noise("HTML report: (paste into browser to view) | Karate version: 1.4.0"));
        assert!(is_noise(&"=".repeat(69)));
        assert!(!is_noise("=="));
        assert!(!is_noise("status 200"));
    }

    #[test]
    fn benign_stderr() {
        assert!(is_benign_stderr("SLF4J: No SLF4J providers were found."));
        assert!(is_benign_stderr("WARNING: An illegal reflective access"));
        assert!(is_benign_stderr("10:00:00.000 [main] WARN  com.intuit - slow"));
        assert!(!is_benign_stderr("Exception in thread \"main\""));
    }
}
