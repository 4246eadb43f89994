//! Progress reporting from cook events.
//!
//! The reporter drains the context's event stream on its own thread and exits when
//! the context is dropped.

use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::thread::JoinHandle;

use cooker_lib::events::CookEvent;

use crate::output::{Tone, file_ready_line, status};

#[derive(Debug, Default)]
pub struct ReporterSummary {
  /// Artifacts written per platform.
  pub files: BTreeMap<String, usize>,
}

pub fn spawn(events: Receiver<CookEvent>, verbose: bool) -> JoinHandle<ReporterSummary> {
  std::thread::spawn(move || {
    let mut summary = ReporterSummary::default();
    for event in events {
      match event {
        CookEvent::FileReady { item, platform, .. } => {
          *summary.files.entry(platform.name().to_string()).or_default() += 1;
          if verbose {
            status(Tone::Note, &file_ready_line(platform.name(), item.as_str()));
          }
        }
        CookEvent::ChildFinished { index, success } if !success => {
          status(Tone::Warn, &format!("Child cooker {index} failed"));
        }
        _ => {}
      }
    }
    summary
  })
}
