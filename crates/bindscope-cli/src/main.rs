//! bindscope CLI - resolve dependency injection bindings out of process.

mod colors;
mod init;
mod list;
mod output;
mod resolve;

use std::path::PathBuf;

use bindscope_core::sink::Collaborators;
use bindscope_core::{AppContext, WorkerConfig};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bindscope")]
#[command(about = "Find where dependency injection bindings are declared")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Worker executable, overriding project configuration
    #[arg(long, global = true)]
    worker: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default .bindscope/project.json
    Init {
        /// Project root
        #[arg(default_value = ".")]
        project: String,

        /// Classpath entries, relative to the project root
        #[arg(long = "classpath")]
        classpath: Vec<String>,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// List the project's modules
    Modules {
        /// Project root
        #[arg(default_value = ".")]
        project: String,

        /// Instantiate every module in a worker to check it
        #[arg(long)]
        validate: bool,
    },

    /// List the project's module contexts
    Contexts {
        /// Project root
        #[arg(default_value = ".")]
        project: String,
    },

    /// Resolve dirty contexts and print their bindings
    Resolve {
        /// Project root
        #[arg(default_value = ".")]
        project: String,

        /// Only print this context
        #[arg(long)]
        context: Option<String>,

        /// Report only these keys (`Key` or `Key@annotation`)
        #[arg(short, long = "key")]
        keys: Vec<String>,
    },

    /// Show where one key is bound in a context
    Locate {
        /// Context name
        context: String,

        /// Key, as `Key` or `Key@annotation`
        key: String,

        /// Project root
        #[arg(long, default_value = ".")]
        project: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    // Problems are printed by the commands; only echo them to the log when verbose.
    let collaborators = if cli.verbose {
        Collaborators::default()
    } else {
        Collaborators::silent()
    };
    let mut app = AppContext::new(collaborators);
    if let Some(worker) = cli.worker {
        app = app.with_worker(WorkerConfig::with_executable(worker));
    }

    // Helper to format bindscope-core errors with recovery hints
    let format_error = |err: anyhow::Error| -> anyhow::Error {
        if let Some(core_err) = err.downcast_ref::<bindscope_core::Error>() {
            anyhow::anyhow!("{}", core_err.with_hint())
        } else {
            err
        }
    };

    match cli.command {
        Commands::Init {
            project,
            classpath,
            force,
        } => init::execute(&project, &classpath, force).map_err(format_error)?,

        Commands::Modules { project, validate } => {
            list::modules(&app, &project, validate).map_err(format_error)?;
        }

        Commands::Contexts { project } => {
            list::contexts(&app, &project).map_err(format_error)?;
        }

        Commands::Resolve {
            project,
            context,
            keys,
        } => {
            resolve::execute(&app, &project, context.as_deref(), &keys).map_err(format_error)?;
        }

        Commands::Locate {
            context,
            key,
            project,
        } => {
            resolve::locate(&app, &project, &context, &key).map_err(format_error)?;
        }
    }

    app.shutdown();
    Ok(())
}
