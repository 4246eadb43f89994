//! Line protocol of the on-demand service.
//!
//! ```text
//! request   COOK <platform> <file>\n
//! success   OK <n>\n followed by n lines of other files cooked since the last reply
//! failure   ERR <message>\n
//! ```
//!
//! A connection may carry any number of requests; each gets exactly one reply.

use thiserror::Error;

use crate::item::ItemId;
use crate::platform::Platform;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
  #[error("empty request")]
  Empty,

  #[error("unknown command {0:?}")]
  UnknownCommand(String),

  #[error("expected `COOK <platform> <file>`")]
  MissingArgument,

  #[error("malformed reply: {0}")]
  MalformedReply(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRequest {
  pub platform: Platform,
  pub file: String,
}

/// Outcome sent back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceReply {
  /// The file is ready. Carries other items cooked since the client last asked.
  Ready { unsolicited: Vec<ItemId> },
  Failed { message: String },
}

impl ServiceReply {
  pub fn failed(message: impl Into<String>) -> Self {
    ServiceReply::Failed {
      message: message.into(),
    }
  }

  pub fn is_ready(&self) -> bool {
    matches!(self, ServiceReply::Ready { .. })
  }
}

pub fn parse_request(line: &str) -> Result<FileRequest, ProtocolError> {
  let line = line.trim();
  if line.is_empty() {
    return Err(ProtocolError::Empty);
  }
  let mut parts = line.splitn(3, ' ');
  let command = parts.next().unwrap_or_default();
  if command != "COOK" {
    return Err(ProtocolError::UnknownCommand(command.to_string()));
  }
  let platform = parts.next().filter(|p| !p.is_empty()).ok_or(ProtocolError::MissingArgument)?;
  let file = parts
    .next()
    .map(str::trim)
    .filter(|f| !f.is_empty())
    .ok_or(ProtocolError::MissingArgument)?;
  Ok(FileRequest {
    platform: Platform::new(platform),
    file: file.to_string(),
  })
}

pub fn format_request(platform: &Platform, file: &str) -> String {
  format!("COOK {} {}\n", platform, file)
}

pub fn format_reply(reply: &ServiceReply) -> String {
  match reply {
    ServiceReply::Ready { unsolicited } => {
      let mut out = format!("OK {}\n", unsolicited.len());
      for item in unsolicited {
        out.push_str(item.as_str());
        out.push('\n');
      }
      out
    }
    ServiceReply::Failed { message } => format!("ERR {}\n", message.replace(['\r', '\n'], " ")),
  }
}

/// Reply header: `Ok(n)` for `OK n`, `Err(reply)` for a complete `ERR` reply.
pub fn parse_reply_header(line: &str) -> Result<Result<usize, ServiceReply>, ProtocolError> {
  let line = line.trim_end();
  if let Some(count) = line.strip_prefix("OK ") {
    let count = count
      .trim()
      .parse()
      .map_err(|_| ProtocolError::MalformedReply(line.to_string()))?;
    return Ok(Ok(count));
  }
  if let Some(message) = line.strip_prefix("ERR") {
    return Ok(Err(ServiceReply::failed(message.trim_start())));
  }
  Err(ProtocolError::MalformedReply(line.to_string()))
}
