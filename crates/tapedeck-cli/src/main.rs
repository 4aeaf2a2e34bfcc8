//! CLI entry point - the composition root.
//!
//! Infrastructure is wired together only via `bootstrap`; command dispatch
//! routes to handlers which call the download manager.

use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use tapedeck_cli::{Cli, CliConfig, CliContext, CliError, Commands, bootstrap, handlers};

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables before clap reads `env` fallbacks
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let Some(command) = cli.command else {
        if let Err(e) = Cli::command().print_help() {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    };

    let config = match CliConfig::resolve(
        cli.data_dir.as_deref(),
        cli.config.as_deref(),
        cli.max_concurrent,
    ) {
        Ok(config) => config,
        Err(e) => return fail(&CliError::Config(format!("{e:#}"))),
    };

    let ctx = match bootstrap(config).await {
        Ok(ctx) => ctx,
        Err(e) => return fail(&CliError::Database(format!("{e:#}"))),
    };

    match dispatch(&ctx, command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(err: &CliError) -> ExitCode {
    eprintln!("error: {err}");
    let code = u8::try_from(err.exit_code()).unwrap_or(1);
    ExitCode::from(code)
}

async fn dispatch(ctx: &CliContext, command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Run { until_idle } => handlers::run::execute(ctx, until_idle).await,
        Commands::Enqueue {
            recording_id,
            sources,
            priority,
        } => handlers::queue::enqueue(ctx, &recording_id, &sources, priority).await,
        Commands::List { status, json } => {
            handlers::queue::list(ctx, status.as_deref(), json).await
        }
        Commands::Stats { json } => handlers::queue::stats(ctx, json).await,
        Commands::Recording { recording_id } => {
            handlers::queue::recording(ctx, &recording_id).await
        }
        Commands::Pause { id } => handlers::control::pause(ctx, &id).await,
        Commands::Resume { id } => handlers::control::resume(ctx, &id).await,
        Commands::Cancel { id, recording } => {
            handlers::control::cancel(ctx, &id, recording).await
        }
        Commands::Delete { id } => handlers::control::delete(ctx, &id).await,
        Commands::Retry { id } => handlers::control::retry(ctx, &id).await,
        Commands::RetryAll => handlers::control::retry_all(ctx).await,
        Commands::AutoRetry { max_retries } => {
            handlers::control::auto_retry(ctx, max_retries).await
        }
        Commands::Reorder { ids } => handlers::control::reorder(ctx, &ids).await,
        Commands::Clear => handlers::control::clear(ctx).await,
        Commands::Priority { id, priority } => {
            handlers::control::priority(ctx, &id, priority).await
        }
        Commands::MarkDelete { id, recording } => {
            handlers::deletion::mark(ctx, &id, recording).await
        }
        Commands::Restore { id, recording } => {
            handlers::deletion::restore(ctx, &id, recording).await
        }
        Commands::Cleanup { grace_secs } => handlers::deletion::cleanup(ctx, grace_secs).await,
    }
}
