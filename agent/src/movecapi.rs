use agent::{ManagementArgs, StaticNetworking, manager_for};
use clap::Args;
use common::{Cluster, Result};
use manager::DirWriter;
use std::{path::PathBuf, sync::Arc};
use tracing::info;

#[derive(Args, Debug)]
pub struct Parameters {
    #[command(flatten)]
    from: ManagementArgs,
    /// Name of the cluster receiving the management objects
    #[arg(long, env = "TARGET_NAME")]
    to_name: String,
    /// Kubeconfig of the cluster receiving the management objects
    #[arg(long, env = "TARGET_KUBECONFIG", value_name = "KUBECONFIG")]
    to_kubeconfig: PathBuf,
}

pub async fn run(args: &Parameters) -> Result<()> {
    let writer = Arc::new(DirWriter::new(&args.from.output)?);
    let manager = manager_for(&args.from, writer, Arc::new(StaticNetworking::default()));
    let to = Cluster::new(&args.to_name, Some(args.to_kubeconfig.clone()));
    manager.move_capi(&args.from.management(), &to).await?;
    info!(to = %to.name, "Management moved");
    Ok(())
}
