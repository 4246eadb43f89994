//! On-demand network service.
//!
//! Connections are served on the tokio runtime. Each request line becomes a
//! [`ServiceRequest`] sent to the coordinating thread, which owns the queue; the
//! connection task waits on a oneshot reply, so one slow item never blocks other
//! clients.

pub mod protocol;

use std::net::SocketAddr;
use std::sync::mpsc::Sender;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::item::ItemId;
use crate::platform::Platform;

pub use protocol::{FileRequest, ProtocolError, ServiceReply};

#[derive(Debug, Error)]
pub enum ServerError {
  #[error("failed to bind {addr}: {source}")]
  Bind {
    addr: SocketAddr,
    #[source]
    source: std::io::Error,
  },

  #[error("connection error: {0}")]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Protocol(#[from] ProtocolError),

  #[error("connection closed before the reply was complete")]
  Closed,
}

/// One client request handed to the coordinating thread.
#[derive(Debug)]
pub struct ServiceRequest {
  pub platform: Platform,
  /// The file as the client named it.
  pub file: String,
  /// `None` when the file is not a cookable item.
  pub item: Option<ItemId>,
  pub reply: oneshot::Sender<ServiceReply>,
}

/// Binds the service on localhost. `None` picks a free port.
pub async fn bind(port: Option<u16>) -> Result<TcpListener, ServerError> {
  let addr = SocketAddr::from(([127, 0, 0, 1], port.unwrap_or(0)));
  TcpListener::bind(addr)
    .await
    .map_err(|source| ServerError::Bind { addr, source })
}

/// Accepts connections until the coordinator goes away.
pub async fn serve(listener: TcpListener, requests: Sender<ServiceRequest>) -> Result<(), ServerError> {
  info!(addr = %listener.local_addr()?, "on-demand service listening");
  loop {
    let (stream, peer) = listener.accept().await?;
    debug!(%peer, "client connected");
    let requests = requests.clone();
    tokio::spawn(async move {
      if let Err(e) = handle_connection(stream, requests).await {
        warn!(%peer, error = %e, "client connection failed");
      }
      debug!(%peer, "client disconnected");
    });
  }
}

async fn handle_connection(stream: TcpStream, requests: Sender<ServiceRequest>) -> Result<(), ServerError> {
  let (reader, mut writer) = stream.into_split();
  let mut lines = BufReader::new(reader).lines();

  while let Some(line) = lines.next_line().await? {
    if line.trim().is_empty() {
      continue;
    }
    let reply = match protocol::parse_request(&line) {
      Ok(request) => dispatch(&requests, request).await,
      Err(e) => ServiceReply::failed(e.to_string()),
    };
    writer.write_all(protocol::format_reply(&reply).as_bytes()).await?;
    writer.flush().await?;
  }
  Ok(())
}

async fn dispatch(requests: &Sender<ServiceRequest>, request: FileRequest) -> ServiceReply {
  let (tx, rx) = oneshot::channel();
  let item = ItemId::from_file_request(&request.file);
  debug!(platform = %request.platform, file = %request.file, cookable = item.is_some(), "file requested");
  let request = ServiceRequest {
    platform: request.platform,
    file: request.file,
    item,
    reply: tx,
  };
  if requests.send(request).is_err() {
    return ServiceReply::failed("cooker is shutting down");
  }
  rx.await
    .unwrap_or_else(|_| ServiceReply::failed("cooker stopped before the file was ready"))
}

/// Client side of the protocol: one request, one reply, on an open connection.
pub async fn request_file(
  stream: &mut BufReader<TcpStream>,
  platform: &Platform,
  file: &str,
) -> Result<ServiceReply, ServerError> {
  stream
    .get_mut()
    .write_all(protocol::format_request(platform, file).as_bytes())
    .await?;

  let mut header = String::new();
  if stream.read_line(&mut header).await? == 0 {
    return Err(ServerError::Closed);
  }
  let count = match protocol::parse_reply_header(&header)? {
    Ok(count) => count,
    Err(failed) => return Ok(failed),
  };

  let mut unsolicited = Vec::with_capacity(count);
  for _ in 0..count {
    let mut line = String::new();
    if stream.read_line(&mut line).await? == 0 {
      return Err(ServerError::Closed);
    }
    if let Some(item) = ItemId::parse(line.trim_end()) {
      unsolicited.push(item);
    }
  }
  Ok(ServiceReply::Ready { unsolicited })
}
