//! Terminal rendering for karatectl.

use chrono::{DateTime, Local, Utc};
use crossterm::style::Stylize;
use karate_core::features::FeatureFile;
use karate_core::history::{group_by_age, AgeGroup};
use karate_core::tools::diff::Difference;
use karate_core::{OutputEvent, OutputSink, RunRecord, Verdict};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::Path;
use tracing::debug;

/// Writes classified run output to a terminal, one event per line.
///
/// Block events (steps, sections, failures, summaries) are separated from
/// the preceding output by a blank line. After the first write error (a
/// closed pipe, usually) the sink drops all further output.
#[derive(Debug)]
pub struct ConsoleSink<W: Write> {
    out: W,
    color: bool,
    written: usize,
    closed: bool,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout(color: bool) -> Self {
        Self::new(io::stdout(), color)
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W, color: bool) -> Self {
        Self {
            out,
            color,
            written: 0,
            closed: false,
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, event: &OutputEvent) -> String {
        let text = event.to_string();
        if !self.color {
            return text;
        }
        let text = text.as_str();
        match event {
            OutputEvent::Banner(_) => text.dark_grey().to_string(),
            OutputEvent::Step(_) => text.cyan().to_string(),
            OutputEvent::Failure(_)
            | OutputEvent::Stderr(_)
            | OutputEvent::Verdict(Verdict::Failed) => text.red().to_string(),
            OutputEvent::Verdict(Verdict::Passed) => text.green().to_string(),
            OutputEvent::Warning(_) => text.yellow().to_string(),
            OutputEvent::Section(_) | OutputEvent::Summary(_) => text.bold().to_string(),
            OutputEvent::Json(_) | OutputEvent::Line(_) => text.to_string(),
        }
    }

    fn write_line(&mut self, text: &str, blank_before: bool) -> io::Result<()> {
        if blank_before {
            writeln!(self.out)?;
        }
        writeln!(self.out, "{text}")?;
        self.out.flush()
    }
}

impl<W: Write> OutputSink for ConsoleSink<W> {
    fn emit(&mut self, event: OutputEvent) {
        if self.closed {
            return;
        }
        let text = self.paint(&event);
        let blank_before = event.is_block() && self.written > 0;
        if let Err(err) = self.write_line(&text, blank_before) {
            debug!(error = %err, "console output closed; dropping further run output");
            self.closed = true;
            return;
        }
        self.written += 1;
    }

    fn clear(&mut self) {
        self.written = 0;
    }
}

/// Print features grouped by folder with their scenarios and line numbers.
pub fn print_feature_tree(root: &Path, groups: &BTreeMap<String, Vec<FeatureFile>>) {
    if groups.is_empty() {
        println!("No feature files found under {}", root.display());
        return;
    }

    let mut total = 0;
    for (folder, features) in groups {
        println!("{folder}/");
        for feature in features {
            let name = feature
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match &feature.title {
                Some(title) if !title.is_empty() => println!("  {name}  ({title})"),
                _ => println!("  {name}"),
            }
            for scenario in &feature.scenarios {
                let kind = if scenario.outline { " [outline]" } else { "" };
                let tags = if scenario.tags.is_empty() {
                    String::new()
                } else {
                    format!(
                        "  {}",
                        scenario
                            .tags
                            .iter()
                            .map(|t| format!("@{t}"))
                            .collect::<Vec<_>>()
                            .join(" ")
                    )
                };
                println!("    {:>5}  {}{kind}{tags}", scenario.line, scenario.name);
            }
            total += 1;
        }
    }

    println!();
    println!("{total} feature(s)");
}

/// Print history grouped by age, newest first.
pub fn print_history(records: &[RunRecord]) {
    if records.is_empty() {
        println!("No runs recorded.");
        return;
    }

    for (group, runs) in group_by_age(records, &Local::now()) {
        print_history_group(group, &runs);
    }
    println!("{} run(s)", records.len());
}

fn print_history_group(group: AgeGroup, runs: &[&RunRecord]) {
    println!("{}", group.label());
    println!(
        "  {:<36}  {:<19}  {:<6}  {:<9}  {:<30}  {}",
        "ID", "TIME", "RESULT", "DURATION", "FEATURE", "SCENARIO"
    );
    println!("  {}", "-".repeat(120));
    for run in runs {
        println!(
            "  {:<36}  {:<19}  {:<6}  {:<9}  {:<30}  {}",
            run.id.0,
            format_time(&run.timestamp),
            format_result(run.result),
            run.duration_ms.map(format_duration).unwrap_or_else(|| "-".to_string()),
            truncate(&run.feature, 30),
            run.scenario.as_deref().unwrap_or("-"),
        );
    }
    println!();
}

/// Print configuration as aligned `key = value` lines.
pub fn print_config(entries: &[(&'static str, String)], source: Option<&Path>) {
    if let Some(path) = source {
        println!("# {}", path.display());
    }
    for (key, value) in entries {
        let shown = if value.is_empty() { "-" } else { value.as_str() };
        println!("{key:<24} = {shown}");
    }
}

pub fn print_differences(differences: &[Difference]) {
    if differences.is_empty() {
        println!("No differences.");
        return;
    }
    for difference in differences {
        println!("{difference}");
    }
    println!();
    println!("{} difference(s)", differences.len());
}

/// Print a short line after a run completes.
pub fn print_run_footer(record: &RunRecord) {
    let counts = match (record.scenarios_passed, record.scenarios_failed) {
        (Some(passed), Some(failed)) => format!(", {passed} passed, {failed} failed"),
        _ => String::new(),
    };
    let duration = record
        .duration_ms
        .map(|ms| format!(" in {}", format_duration(ms)))
        .unwrap_or_default();
    println!("Run {} {}{duration}{counts}", record.id, record.result);
    println!("Report: {}", record.report_path);
}

fn format_result(result: Verdict) -> &'static str {
    match result {
        Verdict::Passed => "PASS",
        Verdict::Failed => "FAIL",
    }
}

fn format_time(dt: &DateTime<Utc>) -> String {
    dt.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}

pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use karate_core::output::Section;
    use pretty_assertions::assert_eq;

    fn render(events: Vec<OutputEvent>) -> String {
        let mut sink = ConsoleSink::new(Vec::new(), false);
        for event in events {
            sink.emit(event);
        }
        String::from_utf8(sink.into_inner()).unwrap()
    }

    #[test]
    fn blocks_are_separated_by_blank_lines() {
        let text = render(vec![
            OutputEvent::Banner("Running a.feature".into()),
            OutputEvent::Step("Given x".into()),
            OutputEvent::Section(Section::Response),
            OutputEvent::Json("{\n  \"a\": 1\n}".into()),
            OutputEvent::Line("plain".into()),
        ]);
        assert_eq!(
            text,
            "Running a.feature\n\n► Given x\n\n📥 Response:\n{\n  \"a\": 1\n}\nplain\n"
        );
    }

    #[test]
    fn first_block_has_no_leading_blank_line() {
        let text = render(vec![OutputEvent::Failure("match failed".into())]);
        assert_eq!(text, "❌ match failed\n");
    }

    #[test]
    fn color_wraps_text_in_escape_codes() {
        let mut sink = ConsoleSink::new(Vec::new(), true);
        sink.emit(OutputEvent::Failure("boom".into()));
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert!(text.contains("\u{1b}["));
        assert!(text.contains("❌ boom"));
    }

    /// Writer whose reader has gone away.
    struct ClosedPipe {
        attempts: usize,
    }

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            self.attempts += 1;
            Err(io::ErrorKind::BrokenPipe.into())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stops_writing_after_the_first_error() {
        let mut sink = ConsoleSink::new(ClosedPipe { attempts: 0 }, false);
        sink.emit(OutputEvent::Line("one".into()));
        sink.emit(OutputEvent::Step("Given two".into()));
        sink.emit(OutputEvent::Line("three".into()));
        assert_eq!(sink.into_inner().attempts, 1);
    }

    #[test]
    fn durations_are_human_readable() {
        assert_eq!(format_duration(250), "250ms");
        assert_eq!(format_duration(1500), "1.5s");
        assert_eq!(format_duration(125_000), "2m05s");
    }

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("features/very/long/path.feature", 12), "features/...");
        assert_eq!(truncate("ééééé", 5), "ééééé");
    }
}
