use std::{fs, io};

use clap::Parser;

use tracing_subscriber::{EnvFilter, fmt};

use pinctl::config::{Cli, Command, Config, ExportArgs, ImportArgs};
use pinctl::state_ops::{self, CancelToken, StateOpsError};

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            cancel.cancel();
        });
    }

    let code = match run(cli, cancel).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{e}");
            exit_code(&e)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli, cancel: CancelToken) -> Result<(), StateOpsError> {
    let config = cli.config;
    match cli.command {
        Command::Upgrade => spawn_op(move || state_ops::upgrade(&config, &cancel)).await,
        Command::Export(args) => spawn_op(move || run_export(&config, args, &cancel)).await,
        Command::Import(args) => spawn_op(move || run_import(&config, args, &cancel)).await,
        Command::Check => spawn_op(move || state_ops::check(&config)).await,
        Command::Cleanup => spawn_op(move || state_ops::cleanup(&config)).await,
    }
}

async fn spawn_op<F>(op: F) -> Result<(), StateOpsError>
where
    F: FnOnce() -> Result<(), StateOpsError> + Send + 'static,
{
    match tokio::task::spawn_blocking(op).await {
        Ok(res) => res,
        Err(e) => Err(StateOpsError::Io(io::Error::other(e.to_string()))),
    }
}

fn run_export(config: &Config, args: ExportArgs, cancel: &CancelToken) -> Result<(), StateOpsError> {
    match args.file {
        Some(path) => {
            let mut file = fs::File::create(&path).map_err(StateOpsError::Io)?;
            state_ops::export(config, &mut file, cancel)
        }
        None => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            state_ops::export(config, &mut out, cancel)
        }
    }
}

fn run_import(config: &Config, args: ImportArgs, cancel: &CancelToken) -> Result<(), StateOpsError> {
    match args.file {
        Some(path) => {
            let file = fs::File::open(&path).map_err(StateOpsError::Io)?;
            state_ops::import(config, file, cancel)
        }
        None => {
            let stdin = io::stdin();
            let source = stdin.lock();
            state_ops::import(config, source, cancel)
        }
    }
}

fn exit_code(err: &StateOpsError) -> i32 {
    match err {
        StateOpsError::OutdatedState { .. } => 3,
        StateOpsError::CorruptSnapshot { .. } => 4,
        StateOpsError::NoSnapshot => 5,
        StateOpsError::Cancelled => 130,
        _ => 1,
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // Logs go to stderr: `export` writes its payload to stdout.
    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .compact()
        .init();
}
