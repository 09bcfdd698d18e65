use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::{Builder, Env};

use crate::core::events::EventError;
use crate::core::{Hook, bridge::HookOutcome, reject_unknown_event};


const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
  /// Hook configuration file (JSON)
  #[arg(long, env = "PBS_HOOK_CONFIG_FILE")]
  config: PathBuf,
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Handle one execjob_launch / execjob_end event read from a file or stdin
  Handle {
    #[arg(default_value = "-")]
    event: String,
  },
  /// List the placeholder manifests currently in the store
  List {},
}

/// `RUST_LOG` overrides the level; without it info and above are logged.
fn logger_builder(env: Env) -> Builder {
  Builder::from_env(env.default_filter_or(DEFAULT_LOG_LEVEL))
}

fn read_event(source: &str, stdin: &mut impl Read) -> Result<String> {
  if source == "-" {
    let mut text = String::new();
    stdin
      .read_to_string(&mut text)
      .context("Failed to read event from stdin")?;
    Ok(text)
  } else {
    std::fs::read_to_string(source).with_context(|| format!("Failed to read event file {}", source))
  }
}

/// Exit codes: 0 accept, 1 reject (message on `out`), 2 config or store failure.
fn run(cli: &Cli, stdin: &mut impl Read, out: &mut impl Write) -> Result<u8> {
  let hook = match Hook::new(&cli.config) {
    Ok(hook) => hook,
    Err(e) => {
      eprintln!("{}", e);
      return Ok(2);
    }
  };

  match &cli.command {
    Commands::Handle { event } => {
      let outcome = match read_event(event, stdin) {
        Ok(text) => hook.handle_event_json(&text),
        Err(e) => reject_unknown_event(EventError::Unreadable(format!("{:#}", e))),
      };
      match outcome {
        HookOutcome::Accept => Ok(0),
        HookOutcome::Reject(msg) => {
          writeln!(out, "{}", msg)?;
          Ok(1)
        }
      }
    }
    Commands::List {} => match hook.list_placeholders() {
      Ok(stored) => {
        for entry in stored {
          match entry.placeholder {
            Ok(p) => writeln!(
              out,
              "{}\tcpu={}\tmemory={}\t{}",
              p.name,
              p.cpu_limit,
              p.memory_limit,
              entry.path.display()
            )?,
            Err(e) => eprintln!("{}: {}", entry.path.display(), e),
          }
        }
        Ok(0)
      }
      Err(e) => {
        eprintln!("{}", e);
        Ok(2)
      }
    },
  }
}

pub fn main() -> ExitCode {
  let _ = logger_builder(Env::default()).try_init();
  let cli = Cli::parse();

  match run(&cli, &mut std::io::stdin(), &mut std::io::stdout()) {
    Ok(code) => ExitCode::from(code),
    Err(e) => {
      eprintln!("{:#}", e);
      ExitCode::from(2)
    }
  }
}
