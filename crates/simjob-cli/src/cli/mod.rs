mod commands;
mod helpers;

use clap::Parser;
use simjob_core::domain::SimJobError;
use tracing_subscriber::EnvFilter;

pub fn run_from_env() -> i32 {
    let args: Vec<String> = std::env::args().skip(1).collect();

    match run(args) {
        Ok(code) => code,
        Err(error) => {
            let job_error = error.as_job_error();
            eprintln!("{}", job_error.diagnostic_line());
            eprintln!("{}", job_error.fatal_exit_line());
            job_error.exit_code()
        }
    }
}

pub fn run<I, S>(args: I) -> Result<i32, CliError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let full_args = std::iter::once("simjob".to_string())
        .chain(args.into_iter().map(Into::into))
        .collect::<Vec<_>>();
    parse_and_dispatch(full_args)
}

fn parse_and_dispatch(args: Vec<String>) -> Result<i32, CliError> {
    match Cli::try_parse_from(&args) {
        Ok(cli) => {
            init_tracing(cli.verbose);
            dispatch_parsed(cli.command)
        }
        Err(err) => match err.kind() {
            clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => {
                print!("{}", err);
                Ok(0)
            }
            _ => Err(CliError::Usage(err.to_string())),
        },
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // a second initialization in the same process keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[derive(Parser)]
#[command(name = "simjob", about = "Input writer and output parser for Dakota and MPET jobs")]
struct Cli {
    /// Log debug events to stderr
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(clap::Subcommand)]
enum CliCommand {
    /// Write the input files of a job and print its descriptor
    Prepare(commands::PrepareArgs),
    /// Classify the retrieved outputs of a finished job
    Parse(commands::ParseArgs),
    /// Read an existing input file back into parameters
    Immigrate(commands::ImmigrateArgs),
}

fn dispatch_parsed(command: CliCommand) -> Result<i32, CliError> {
    match command {
        CliCommand::Prepare(args) => commands::run_prepare_command(args),
        CliCommand::Parse(args) => commands::run_parse_command(args),
        CliCommand::Immigrate(args) => commands::run_immigrate_command(args),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Job(SimJobError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<SimJobError> for CliError {
    fn from(error: SimJobError) -> Self {
        Self::Job(error)
    }
}

impl CliError {
    fn as_job_error(&self) -> SimJobError {
        match self {
            Self::Usage(message) => SimJobError::input_validation("INPUT.CLI_USAGE", message.clone()),
            Self::Job(error) => error.clone(),
            Self::Internal(error) => SimJobError::io_system("IO.CLI", format!("{error:#}")),
        }
    }
}
