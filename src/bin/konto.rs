use anyhow::Result;
use konto::cli::{actions, actions::Action, start};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse arguments and initialize telemetry
    let action = start()?;

    // Handle the action
    match action {
        Action::Server(args) => actions::server::execute(args).await?,
    }

    konto::cli::telemetry::shutdown_tracer();

    Ok(())
}
