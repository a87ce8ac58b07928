use agent::{ManagementArgs, manager_for};
use clap::Args;
use common::{Cluster, Result};
use manager::DirWriter;
use std::sync::Arc;
use tracing::info;

#[derive(Args, Debug)]
pub struct Parameters {
    #[command(flatten)]
    management: ManagementArgs,
    /// Cluster to delete
    #[arg(short = 'n', long, env = "CLUSTER_NAME")]
    name: String,
    /// Collect the controller logs of the management cluster first
    #[arg(long)]
    save_logs: bool,
}

pub async fn run(args: &Parameters) -> Result<()> {
    let writer = Arc::new(DirWriter::new(&args.management.output)?);
    let manager = manager_for(&args.management, writer, Arc::new(agent::StaticNetworking::default()));
    let management = args.management.management();
    if args.save_logs {
        manager.save_logs(&management).await?;
    }
    manager
        .delete_cluster(&management, &Cluster::new(&args.name, None))
        .await?;
    info!(cluster = %args.name, "Cluster deleted");
    Ok(())
}
