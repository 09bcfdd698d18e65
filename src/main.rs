mod cli;
mod core;

use std::process::ExitCode;

fn main() -> ExitCode {
  cli::main()
}
