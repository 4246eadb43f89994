//! Terminal rendering of cook progress and run reports.
//!
//! Report rows are built as plain strings first and only colored when printed, so
//! the layout can be tested without a terminal.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use cooker_lib::report::{ErrorClass, RunError, RunReport};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

/// Leading mark and color of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
  Done,
  Note,
  Warn,
  Fail,
}

impl Tone {
  fn mark(self) -> &'static str {
    match self {
      Tone::Done => "✓",
      Tone::Note => "•",
      Tone::Warn => "⚠",
      Tone::Fail => "✗",
    }
  }

  /// Tone a recorded error is shown in. Child failures lose a whole slice of work.
  pub fn for_error(error: &RunError) -> Tone {
    match error.kind.class() {
      ErrorClass::ChildProcess => Tone::Fail,
      ErrorClass::RecoverableSkip | ErrorClass::RecoverablePerPlatform => Tone::Warn,
    }
  }
}

pub fn status(tone: Tone, message: &str) {
  let mark = tone.mark();
  match tone {
    Tone::Done => println!("{} {message}", mark.if_supports_color(Stream::Stdout, |s| s.green())),
    Tone::Note => println!("{} {message}", mark.if_supports_color(Stream::Stdout, |s| s.blue())),
    Tone::Warn => eprintln!(
      "{} {}",
      mark.if_supports_color(Stream::Stderr, |s| s.yellow()),
      message.if_supports_color(Stream::Stderr, |s| s.yellow())
    ),
    Tone::Fail => eprintln!(
      "{} {}",
      mark.if_supports_color(Stream::Stderr, |s| s.red()),
      message.if_supports_color(Stream::Stderr, |s| s.red())
    ),
  }
}

/// One verbose progress line for a written artifact.
pub fn file_ready_line(platform: &str, item: &str) -> String {
  format!("[{platform}] → {item}")
}

pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
  if bytes < 1024 {
    return format!("{bytes} B");
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit < UNITS.len() - 1 {
    value /= 1024.0;
    unit += 1;
  }
  format!("{value:.1} {}", UNITS[unit])
}

/// `kind item [platform]: message`, leaving out whatever the error does not name.
pub fn error_line(error: &RunError) -> String {
  let mut line = error.kind.as_str().to_string();
  if let Some(item) = &error.item {
    line.push(' ');
    line.push_str(item.as_str());
  }
  if let Some(platform) = &error.platform {
    line.push_str(&format!(" [{platform}]"));
  }
  line.push_str(": ");
  line.push_str(&error.message);
  line
}

/// Label and value rows of a finished batch cook.
pub fn batch_rows(
  report: &RunReport,
  files: &BTreeMap<String, usize>,
  platforms: &str,
  elapsed: Duration,
) -> Vec<(String, String)> {
  let mut rows = vec![
    ("Platforms".to_string(), platforms.to_string()),
    ("Items cooked".to_string(), report.cooked.to_string()),
    ("Up to date".to_string(), report.up_to_date.to_string()),
  ];
  if report.skipped > 0 {
    rows.push(("Skipped".to_string(), report.skipped.to_string()));
  }
  for (platform, count) in files {
    rows.push((format!("Artifacts ({platform})"), count.to_string()));
  }
  rows.push(("Written".to_string(), format_bytes(report.bytes_written)));
  if report.children_spawned > 0 {
    rows.push((
      "Child cookers".to_string(),
      format!("{} ({} failed)", report.children_spawned, report.children_failed),
    ));
  }
  rows.push(("Duration".to_string(), millis(elapsed)));
  rows
}

/// Label and value rows of a stopped on-demand service.
pub fn service_rows(report: &RunReport, uptime: Duration) -> Vec<(String, String)> {
  vec![
    ("Items cooked".to_string(), report.cooked.to_string()),
    ("Artifacts".to_string(), report.artifacts_written.to_string()),
    ("Written".to_string(), format_bytes(report.bytes_written)),
    ("Uptime".to_string(), seconds(uptime)),
  ]
}

fn millis(duration: Duration) -> String {
  humantime::format_duration(Duration::from_millis(duration.as_millis() as u64)).to_string()
}

fn seconds(duration: Duration) -> String {
  humantime::format_duration(Duration::from_secs(duration.as_secs())).to_string()
}

pub fn print_rows(rows: &[(String, String)]) {
  for (label, value) in rows {
    println!("  {}: {value}", label.if_supports_color(Stream::Stdout, |s| s.dimmed()));
  }
}

/// Status line, stats, then every recorded error.
pub fn print_batch_report(report: &RunReport, files: &BTreeMap<String, usize>, platforms: &str, elapsed: Duration) {
  if report.cancelled {
    status(Tone::Warn, "Cook cancelled");
  } else {
    status(Tone::Done, "Cook complete!");
  }
  print_rows(&batch_rows(report, files, platforms, elapsed));
  for error in &report.errors {
    status(Tone::for_error(error), &error_line(error));
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize report")?;
  println!("{json}");
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use cooker_lib::item::ItemId;
  use cooker_lib::platform::Platform;
  use cooker_lib::report::ErrorKind;

  #[test]
  fn bytes_scale_to_largest_unit() {
    assert_eq!(format_bytes(500), "500 B");
    assert_eq!(format_bytes(1536), "1.5 KB");
    assert_eq!(format_bytes(1048576), "1.0 MB");
    assert_eq!(format_bytes(5 * 1073741824 + 536870912), "5.5 GB");
  }

  #[test]
  fn error_line_names_only_what_is_known() {
    let mut report = RunReport::default();
    report.push(ErrorKind::PathTooLong, Some(&ItemId::new("/Game/A")), Some(&Platform::new("Win64")), "too long");
    report.push(ErrorKind::ChildFailed, None, None, "child 0 exited with 3");

    assert_eq!(error_line(&report.errors[0]), "path_too_long /Game/A [Win64]: too long");
    assert_eq!(error_line(&report.errors[1]), "child_failed: child 0 exited with 3");
    assert_eq!(Tone::for_error(&report.errors[0]), Tone::Warn);
    assert_eq!(Tone::for_error(&report.errors[1]), Tone::Fail);
  }

  #[test]
  fn batch_rows_list_artifacts_per_platform() {
    let report = RunReport {
      cooked: 3,
      up_to_date: 1,
      bytes_written: 2048,
      ..Default::default()
    };
    let files = BTreeMap::from([("Linux".to_string(), 3), ("Win64".to_string(), 2)]);
    let rows = batch_rows(&report, &files, "Linux+Win64", Duration::from_millis(1500));

    let labels: Vec<&str> = rows.iter().map(|(label, _)| label.as_str()).collect();
    assert_eq!(
      labels,
      vec!["Platforms", "Items cooked", "Up to date", "Artifacts (Linux)", "Artifacts (Win64)", "Written", "Duration"]
    );
    assert_eq!(rows[5].1, "2.0 KB");
    assert_eq!(rows[6].1, "1s 500ms");
  }

  #[test]
  fn child_cookers_row_only_when_distributed() {
    let report = RunReport {
      children_spawned: 2,
      children_failed: 1,
      ..Default::default()
    };
    let rows = batch_rows(&report, &BTreeMap::new(), "Win64", Duration::ZERO);
    assert!(rows.contains(&("Child cookers".to_string(), "2 (1 failed)".to_string())));
  }
}
