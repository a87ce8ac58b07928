mod create;
mod delete;
mod logs;
mod movecapi;
mod reconcile;
mod schema;
mod ssmrun;
mod upgrade;

use clap::{Parser, Subcommand};
use std::process;
use tracing_subscriber::{EnvFilter, Registry, prelude::*};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Parameters {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a workload cluster from the management cluster
    Create(create::Parameters),
    /// Upgrade a cluster to its configuration
    Upgrade(upgrade::Parameters),
    /// Delete a workload cluster
    Delete(delete::Parameters),
    /// Move the CAPI management objects to another cluster
    Move(movecapi::Parameters),
    /// Pause the reconciliation of a cluster objects
    Pause(reconcile::Parameters),
    /// Resume the reconciliation of a cluster objects
    Resume(reconcile::Parameters),
    /// Collect the controller logs of a cluster
    Logs(logs::Parameters),
    /// Run a shell command on an instance through SSM
    SsmRun(ssmrun::Parameters),
    /// Print the JSON schema of the cluster configuration file
    Schema(schema::Parameters),
}

#[tokio::main]
async fn main() {
    let logger = tracing_subscriber::fmt::layer();
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let collector = Registry::default().with(logger).with(env_filter);
    if let Err(e) = tracing::subscriber::set_global_default(collector) {
        eprintln!("Failed to set up logging: {e}");
    }

    let args = Parameters::parse();
    let (name, res) = match &args.command {
        Commands::Create(args) => ("Create", create::run(args).await),
        Commands::Upgrade(args) => ("Upgrade", upgrade::run(args).await),
        Commands::Delete(args) => ("Delete", delete::run(args).await),
        Commands::Move(args) => ("Move", movecapi::run(args).await),
        Commands::Pause(args) => ("Pause", reconcile::pause(args).await),
        Commands::Resume(args) => ("Resume", reconcile::resume(args).await),
        Commands::Logs(args) => ("Logs", logs::run(args).await),
        Commands::SsmRun(args) => ("SSM run", ssmrun::run(args).await),
        Commands::Schema(args) => ("Schema", schema::run(args).await),
    };
    if let Err(e) = res {
        tracing::error!("{name} failed with: {e}");
        process::exit(1)
    }
}
