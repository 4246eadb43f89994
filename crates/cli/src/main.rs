mod cmd;
mod output;
mod reporter;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{ArgAction, ArgGroup, Parser};
use tracing_subscriber::EnvFilter;

use cmd::{ByTheBookArgs, OnTheFlyArgs, Port, parse_port};
use cooker_lib::consts::DEFAULT_PORT;
use output::{OutputFormat, Tone, status};

#[derive(Parser)]
#[command(name = "cook")]
#[command(author, version, about = "Incremental, platform-aware content cooker", long_about = None)]
#[command(group(ArgGroup::new("mode").required(true).args(["by_the_book", "on_the_fly"])))]
struct Cli {
  /// Cook a fixed batch of items and exit
  #[arg(long)]
  by_the_book: bool,

  /// Serve cook requests over TCP until interrupted
  #[arg(long)]
  on_the_fly: bool,

  /// Project root (defaults to COOKER_PROJECT or the current directory)
  #[arg(long, value_name = "DIR")]
  project: Option<PathBuf>,

  /// Maps to cook, comma separated
  #[arg(long, value_delimiter = ',', value_name = "A,B")]
  maps: Vec<String>,

  /// Logical directories to cook, comma separated
  #[arg(long, value_delimiter = ',', value_name = "D1,D2")]
  dirs: Vec<String>,

  /// Target platforms, separated by ',' or '+'
  #[arg(long, value_name = "P1,P2")]
  platforms: Option<String>,

  /// Keep artifacts that are still valid instead of cooking from scratch
  #[arg(long)]
  iterative: bool,

  /// Child cooker processes to distribute the batch across
  #[arg(long, value_name = "N")]
  processes: Option<usize>,

  /// Cook only the content of this plugin
  #[arg(long, value_name = "NAME")]
  dlc: Option<String>,

  /// Sandbox root (defaults to COOKER_SANDBOX or <project>/Saved/Cooked)
  #[arg(long, value_name = "DIR")]
  sandbox: Option<PathBuf>,

  /// Reclaim everything at the end and report handles that stayed alive
  #[arg(long)]
  leak_test: bool,

  /// Write the dependency graph of every cooked map
  #[arg(long)]
  dump_dependency_graph: bool,

  /// Run as a child worker cooking the items listed in RESPONSE_FILE
  #[arg(long, value_name = "RESPONSE_FILE")]
  cook_child: Option<PathBuf>,

  /// Port for the on-demand service, or `auto`
  #[arg(long, default_value_t = Port::Fixed(DEFAULT_PORT), value_parser = parse_port)]
  port: Port,

  /// Output format
  #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  /// Increase log verbosity (-v info, -vv debug)
  #[arg(short, long, action = ArgAction::Count)]
  verbose: u8,
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  match run(cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      status(Tone::Fail, &format!("{e:#}"));
      ExitCode::FAILURE
    }
  }
}

fn run(cli: Cli) -> Result<()> {
  if cli.on_the_fly {
    cmd::cmd_on_the_fly(OnTheFlyArgs {
      project: cli.project,
      platforms: cli.platforms,
      port: cli.port,
      sandbox: cli.sandbox,
      iterative: cli.iterative,
      output: cli.output,
    })
  } else {
    cmd::cmd_by_the_book(ByTheBookArgs {
      project: cli.project,
      maps: cli.maps,
      dirs: cli.dirs,
      platforms: cli.platforms,
      iterative: cli.iterative,
      processes: cli.processes,
      dlc: cli.dlc,
      sandbox: cli.sandbox,
      leak_test: cli.leak_test,
      dump_dependency_graph: cli.dump_dependency_graph,
      cook_child: cli.cook_child,
      output: cli.output,
      verbose: cli.verbose,
    })
  }
}

/// Logs go to stderr. `RUST_LOG` overrides the level picked by `-v`.
fn init_tracing(verbose: u8) {
  let level = match verbose {
    0 => "warn",
    1 => "info",
    _ => "debug",
  };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_target(false)
    .init();
}
