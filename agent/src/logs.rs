use agent::{ManagementArgs, StaticNetworking, manager_for};
use clap::Args;
use common::{Cluster, Result, tables::LOG_DIR};
use manager::DirWriter;
use std::{path::PathBuf, sync::Arc};
use tracing::info;

#[derive(Args, Debug)]
pub struct Parameters {
    #[command(flatten)]
    management: ManagementArgs,
    /// Collect from this cluster instead of the management cluster
    #[arg(long, value_name = "KUBECONFIG")]
    cluster_kubeconfig: Option<PathBuf>,
}

pub async fn run(args: &Parameters) -> Result<()> {
    let writer = Arc::new(DirWriter::new(&args.management.output)?);
    let manager = manager_for(&args.management, writer, Arc::new(StaticNetworking::default()));
    let cluster = match &args.cluster_kubeconfig {
        Some(kubeconfig) => Cluster::new("workload", Some(kubeconfig.clone())),
        None => args.management.management(),
    };
    manager.save_logs(&cluster).await?;
    info!(
        dir = %args.management.output.join(LOG_DIR).display(),
        "Logs saved"
    );
    Ok(())
}
