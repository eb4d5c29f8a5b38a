mod cli;
mod commands;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run().await {
        eprintln!("error: {error}");
        std::process::exit(error.exit_code());
    }
}

async fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let response = commands::run(&cli).await?;
    output::render(&response, cli.pretty)?;

    if response.is_error() {
        return Err(CliError::Command(
            response
                .error
                .as_ref()
                .map(|error| error.message.clone())
                .unwrap_or_else(|| String::from("request failed")),
        ));
    }

    Ok(())
}
