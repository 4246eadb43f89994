mod by_the_book;
mod on_the_fly;

use std::fmt;
use std::path::{Path, PathBuf};

use cooker_lib::platform::paths;

pub use by_the_book::{ByTheBookArgs, cmd_by_the_book};
pub use on_the_fly::{OnTheFlyArgs, cmd_on_the_fly};

/// Listening port for the on-demand service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
  /// Let the OS pick a free port.
  Auto,
  Fixed(u16),
}

impl Port {
  pub fn as_option(self) -> Option<u16> {
    match self {
      Port::Auto => None,
      Port::Fixed(port) => Some(port),
    }
  }
}

impl fmt::Display for Port {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Port::Auto => f.write_str("auto"),
      Port::Fixed(port) => write!(f, "{port}"),
    }
  }
}

pub fn parse_port(value: &str) -> Result<Port, String> {
  if value.eq_ignore_ascii_case("auto") {
    return Ok(Port::Auto);
  }
  value
    .parse::<u16>()
    .map(Port::Fixed)
    .map_err(|_| format!("expected `auto` or a port number, got `{value}`"))
}

/// Project root from the flag, `COOKER_PROJECT` or the current directory.
fn resolve_project(project: Option<PathBuf>) -> PathBuf {
  let project = project.unwrap_or_else(paths::project_dir);
  dunce::canonicalize(&project).unwrap_or(project)
}

fn resolve_sandbox(sandbox: Option<PathBuf>, project: &Path, dlc: Option<&str>) -> PathBuf {
  sandbox.unwrap_or_else(|| paths::sandbox_dir(project, dlc))
}
