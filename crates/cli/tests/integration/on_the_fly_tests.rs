//! Integration tests for `cook --on-the-fly`.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::process::{Child, Command, Stdio};

use serial_test::serial;

use crate::common::TestEnv;

/// A running service. Killed on drop.
struct Service {
  child: Child,
  addr: String,
}

impl Service {
  fn start(env: &TestEnv) -> Self {
    let mut child = Command::new(env!("CARGO_BIN_EXE_cook"))
      .args(["--on-the-fly", "--port", "auto", "--platforms", "Win64"])
      .env("COOKER_PROJECT", env.root())
      .env("COOKER_SANDBOX", env.sandbox())
      .stdout(Stdio::piped())
      .stderr(Stdio::null())
      .spawn()
      .unwrap();

    let stdout = child.stdout.take().unwrap();
    let mut line = String::new();
    BufReader::new(stdout).read_line(&mut line).unwrap();
    let addr = line
      .trim()
      .strip_prefix("listening on ")
      .unwrap_or_else(|| panic!("unexpected first line: {line:?}"))
      .to_string();
    Self { child, addr }
  }

  fn connect(&self) -> Client {
    let stream = TcpStream::connect(&self.addr).unwrap();
    Client {
      reader: BufReader::new(stream.try_clone().unwrap()),
      writer: stream,
    }
  }
}

impl Drop for Service {
  fn drop(&mut self) {
    let _ = self.child.kill();
    let _ = self.child.wait();
  }
}

struct Client {
  reader: BufReader<TcpStream>,
  writer: TcpStream,
}

impl Client {
  /// Sends one request. Returns the header line and any announced items.
  fn cook(&mut self, platform: &str, file: &str) -> (String, Vec<String>) {
    writeln!(self.writer, "COOK {platform} {file}").unwrap();
    let mut header = String::new();
    self.reader.read_line(&mut header).unwrap();
    let header = header.trim_end().to_string();

    let count: usize = header
      .strip_prefix("OK ")
      .map(|n| n.parse().unwrap())
      .unwrap_or(0);
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
      let mut line = String::new();
      self.reader.read_line(&mut line).unwrap();
      items.push(line.trim_end().to_string());
    }
    (header, items)
  }
}

#[test]
#[serial]
fn requested_file_is_cooked_before_the_reply() {
  let env = TestEnv::new();
  env.write_asset("Props/Crate", &["/Game/Props/Wood"]);
  env.write_asset("Props/Wood", &[]);
  let service = Service::start(&env);
  let mut client = service.connect();

  let (header, _) = client.cook("Win64", "/Game/Props/Crate.uasset");
  assert!(header.starts_with("OK"), "{header}");
  assert!(env.artifact("Win64", "Props/Crate").exists());
  assert!(env.sandbox().join("Win64/Metadata/AssetRegistry.bin").exists());
}

#[test]
#[serial]
fn one_connection_serves_many_requests() {
  let env = TestEnv::new();
  env.write_asset("Props/Crate", &[]);
  env.write_asset("Props/Barrel", &[]);
  let service = Service::start(&env);
  let mut client = service.connect();

  let (missing, _) = client.cook("Win64", "/Game/Props/Missing.uasset");
  assert!(missing.starts_with("ERR"), "{missing}");

  let (other_platform, _) = client.cook("PS9", "/Game/Props/Crate.uasset");
  assert!(other_platform.contains("PS9"), "{other_platform}");

  for file in ["/Game/Props/Crate.uasset", "/Game/Props/Barrel.uasset", "/Game/Config/Default.ini"] {
    let (header, _) = client.cook("Win64", file);
    assert!(header.starts_with("OK"), "{file}: {header}");
  }
  assert!(env.artifact("Win64", "Props/Barrel").exists());
}
