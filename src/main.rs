//! The `qq` command-line binary.

mod commands;

use clap::Parser;
use clap::Subcommand;
use clap_verbosity_flag::Verbosity;
use qq_core::Config;

use commands::kill::KillArgs;
use commands::list::ListArgs;
use commands::run::RunArgs;
use commands::status::StatusArgs;
use commands::submit::SubmitArgs;

/// Submits, runs, and tracks batch jobs over PBS Pro, Slurm, or a virtual
/// in-process batch system.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Overrides batch-system detection (`pbs`, `slurm`, `vbs`).
    #[arg(long, global = true)]
    batch_system: Option<String>,

    #[command(flatten)]
    verbosity: Verbosity,

    #[command(subcommand)]
    command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Validates and submits a script.
    Submit(SubmitArgs),
    /// Runs a script under the Runner; invoked only via the script shebang.
    Run(RunArgs),
    /// Marks a job killed and asks the backend to terminate it.
    Kill(KillArgs),
    /// Prints a job's reconciled state.
    Status(StatusArgs),
    /// Lists jobs known to the detected backend for the current user.
    List(ListArgs),
}

fn init_logging(verbosity: &Verbosity) {
    let debug_mode = std::env::var(qq_core::constants::ENV_DEBUG_MODE).is_ok();
    let level = if debug_mode {
        tracing::level_filters::LevelFilter::DEBUG
    } else {
        verbosity.log_level_filter().as_trace()
    };

    let subscriber = tracing_subscriber::fmt().with_writer(std::io::stderr).with_target(false).with_max_level(level);

    if debug_mode {
        subscriber.with_file(true).with_line_number(true).init();
    } else {
        subscriber.without_time().init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli.verbosity);

    let _ = Config::set_global(Config::load().unwrap_or_default());

    let exit_code = match cli.command {
        Command::Submit(args) => match commands::submit::run(args, cli.batch_system.as_deref()).await {
            Ok(()) => 0,
            Err(err) => {
                tracing::error!("{err}");
                err.submit_exit_code()
            }
        },
        Command::Run(args) => match commands::run::run(args).await {
            Ok(code) => code,
            Err(err) => {
                tracing::error!("{err}");
                err.run_exit_code()
            }
        },
        Command::Kill(args) => match commands::kill::run(args, cli.batch_system.as_deref()).await {
            Ok(()) => 0,
            Err(err) => {
                tracing::error!("{err}");
                err.submit_exit_code()
            }
        },
        Command::Status(args) => match commands::status::run(args, cli.batch_system.as_deref()).await {
            Ok(()) => 0,
            Err(err) => {
                tracing::error!("{err}");
                err.submit_exit_code()
            }
        },
        Command::List(args) => match commands::list::run(args, cli.batch_system.as_deref()).await {
            Ok(()) => 0,
            Err(err) => {
                tracing::error!("{err}");
                err.submit_exit_code()
            }
        },
    };

    std::process::exit(exit_code);
}
