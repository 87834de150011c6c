//! bindscope worker process.
//!
//! Started by the process runner as `bindscope-worker [flags] --classpath <entries>`.
//! Answers with a handshake, then runs one snippet per `Run` command read
//! from stdin and writes one `Result` frame per command to stdout, in
//! order, until `Shutdown` or end of input.
//!
//! stdout carries nothing but protocol frames; logs go to stderr.

mod classpath;
mod descriptor;
mod injector;
mod snippets;

use std::ffi::OsString;
use std::io::{self, BufReader, BufWriter, Write};

use bindscope_core::ipc::{WorkerCommand, WorkerResponse, read_message, write_message};
use tracing_subscriber::EnvFilter;

use classpath::Classpath;
use snippets::Action;

/// Environment variable holding the worker's log filter.
const LOG_ENV: &str = "BINDSCOPE_WORKER_LOG";

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let args: Vec<OsString> = std::env::args_os().skip(1).collect();
    let stdout = io::stdout();
    let mut output = BufWriter::new(stdout.lock());

    let classpath = match Classpath::from_args(&args) {
        Ok(classpath) => classpath,
        Err(e) => {
            tracing::error!("Cannot start: {:#}", e);
            write_message(
                &mut output,
                &WorkerResponse::LaunchError {
                    message: format!("{:#}", e),
                },
            )?;
            std::process::exit(2);
        }
    };
    tracing::debug!("Classpath: {:?}", classpath.entries());
    write_message(&mut output, &WorkerResponse::Ready)?;

    let stdin = io::stdin();
    let mut input = BufReader::new(stdin.lock());
    loop {
        let command: WorkerCommand = match read_message(&mut input) {
            Ok(command) => command,
            Err(e) => {
                tracing::debug!("Input closed: {}", e);
                break;
            }
        };

        match command {
            WorkerCommand::Shutdown => break,
            WorkerCommand::Run { snippet, arguments } => {
                match snippets::run(&classpath, &snippet, &arguments) {
                    Action::Reply(outcome) => {
                        write_message(&mut output, &WorkerResponse::Result(outcome))?;
                    }
                    Action::Exit(code) => {
                        tracing::debug!("Exiting with code {} on request", code);
                        output.flush()?;
                        std::process::exit(code);
                    }
                }
            }
        }
    }

    output.flush()?;
    Ok(())
}
